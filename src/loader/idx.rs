//! MNIST-style IDX files: one image file (magic 2051) and one label file
//! (magic 2049), both with big-endian `u32` headers.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use super::{BatchData, Cursor, Loader, MetaData};
use crate::{Error, Matrix, Result};

const IMAGE_MAGIC: u32 = 2051;
const LABEL_MAGIC: u32 = 2049;
const NUMBER_CLASSES: usize = 10;
const IMAGE_HEADER_BYTES: u64 = 16;
const LABEL_HEADER_BYTES: u64 = 8;

#[derive(Debug)]
struct State {
    cursor: Cursor,
    images: BufReader<File>,
    labels: BufReader<File>,
}

/// Reads an image/label IDX pair sequentially in batches.
///
/// Pixels are scaled to `[0, 1)`, labels become one-hot columns over 10 classes.
#[derive(Debug)]
pub struct IdxLoader {
    image_path: PathBuf,
    label_path: PathBuf,
    batch_size: usize,
    state: Mutex<Option<State>>,
}

impl IdxLoader {
    pub fn new<P: AsRef<Path>, Q: AsRef<Path>>(
        image_path: P,
        label_path: Q,
        batch_size: usize,
    ) -> Result<Self> {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch_size must be > 0".to_owned()));
        }
        Ok(Self {
            image_path: image_path.as_ref().to_path_buf(),
            label_path: label_path.as_ref().to_path_buf(),
            batch_size,
            state: Mutex::new(None),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<State>>> {
        self.state
            .lock()
            .map_err(|_| Error::Concurrency("idx loader lock poisoned".to_owned()))
    }
}

fn open_file(path: &Path) -> Result<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| Error::Loader(format!("failed to open {}: {e}", path.display())))
}

fn read_u32<R: Read>(reader: &mut R, path: &Path) -> Result<u32> {
    let mut buf = [0_u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| Error::Loader(format!("truncated header in {}: {e}", path.display())))?;
    Ok(u32::from_be_bytes(buf))
}

/// Fails unless the file holds exactly `header + declared` bytes.
fn check_payload(
    reader: &BufReader<File>,
    header: u64,
    declared: usize,
    path: &Path,
) -> Result<()> {
    let len = reader
        .get_ref()
        .metadata()
        .map_err(|e| Error::Loader(format!("failed to stat {}: {e}", path.display())))?
        .len();
    let available = len.saturating_sub(header);
    if u64::try_from(declared).map_or(true, |d| d != available) {
        return Err(Error::Loader(format!(
            "{} header declares {declared} data bytes, file holds {available}",
            path.display()
        )));
    }
    Ok(())
}

fn check_magic(found: u32, expected: u32, path: &Path) -> Result<()> {
    if found != expected {
        return Err(Error::Loader(format!(
            "{} has magic number {found}, expected {expected}",
            path.display()
        )));
    }
    Ok(())
}

impl Loader for IdxLoader {
    fn open(&self) -> Result<MetaData> {
        let mut images = open_file(&self.image_path)?;
        let mut labels = open_file(&self.label_path)?;

        check_magic(
            read_u32(&mut images, &self.image_path)?,
            IMAGE_MAGIC,
            &self.image_path,
        )?;
        let image_count = read_u32(&mut images, &self.image_path)? as usize;
        let height = read_u32(&mut images, &self.image_path)? as usize;
        let width = read_u32(&mut images, &self.image_path)? as usize;

        check_magic(
            read_u32(&mut labels, &self.label_path)?,
            LABEL_MAGIC,
            &self.label_path,
        )?;
        let label_count = read_u32(&mut labels, &self.label_path)? as usize;

        if image_count != label_count {
            return Err(Error::Loader(format!(
                "{} holds {image_count} images but {} holds {label_count} labels",
                self.image_path.display(),
                self.label_path.display()
            )));
        }
        let input_size = height.checked_mul(width).ok_or_else(|| {
            Error::Loader(format!(
                "{} declares oversized {height}x{width} images",
                self.image_path.display()
            ))
        })?;
        if input_size == 0 {
            return Err(Error::Loader(format!(
                "{} declares empty {height}x{width} images",
                self.image_path.display()
            )));
        }
        let pixel_bytes = image_count.checked_mul(input_size).ok_or_else(|| {
            Error::Loader(format!(
                "{} declares {image_count} images of {input_size} pixels, which overflows",
                self.image_path.display()
            ))
        })?;
        check_payload(&images, IMAGE_HEADER_BYTES, pixel_bytes, &self.image_path)?;
        check_payload(&labels, LABEL_HEADER_BYTES, label_count, &self.label_path)?;

        let meta = MetaData::new(input_size, NUMBER_CLASSES, image_count, self.batch_size);
        *self.lock()? = Some(State {
            cursor: Cursor::new(meta),
            images,
            labels,
        });
        Ok(meta)
    }

    fn read_batch(&self) -> Result<BatchData> {
        let mut guard = self.lock()?;
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::Loader("idx loader is not open".to_owned()))?;

        let (batch_index, first_item, items) = state.cursor.advance()?;
        let input_size = state.cursor.meta.input_size;

        let mut pixels = vec![0_u8; items * input_size];
        state.images.read_exact(&mut pixels).map_err(|e| {
            Error::Loader(format!(
                "short read of images {first_item}..{} from {}: {e}",
                first_item + items,
                self.image_path.display()
            ))
        })?;
        let mut labels = vec![0_u8; items];
        state.labels.read_exact(&mut labels).map_err(|e| {
            Error::Loader(format!(
                "short read of labels {first_item}..{} from {}: {e}",
                first_item + items,
                self.label_path.display()
            ))
        })?;

        // Each image is contiguous, i.e. one column-major column.
        let input = Matrix::from_vec(
            input_size,
            items,
            pixels.iter().map(|&p| f64::from(p) / 256.0).collect(),
        )?;

        let mut expected = Matrix::zeros(NUMBER_CLASSES, items);
        for (col, &label) in labels.iter().enumerate() {
            let label = usize::from(label);
            if label >= NUMBER_CLASSES {
                return Err(Error::Loader(format!(
                    "label {label} of item {} is out of range",
                    first_item + col
                )));
            }
            expected.set(label, col, 1.0);
        }

        Ok(BatchData {
            input,
            expected,
            batch_index,
            items_read: items,
        })
    }

    fn close(&self) -> Result<()> {
        *self.lock()? = None;
        Ok(())
    }

    fn metadata(&self) -> Result<MetaData> {
        self.lock()?
            .as_ref()
            .map(|s| s.cursor.meta)
            .ok_or_else(|| Error::Loader("idx loader is not open".to_owned()))
    }
}
