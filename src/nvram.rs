use std::fs::{File, OpenOptions};
use std::io::prelude::*;
use std::io::SeekFrom;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chip::Ds1302;
use crate::registers::NUM_REGS;
use crate::{RtcError, RtcResult};

/// Battery-backed image of the chip, kept in memory and mirrored to an
/// optional backing file so contents survive power cycles.
#[derive(Serialize, Deserialize, Debug)]
pub struct NvramFile {
    path: Option<PathBuf>,
    #[serde(skip)]
    file: Option<File>,
    buffer: Vec<u8>,
}

impl Clone for NvramFile {
    fn clone(&self) -> NvramFile {
        // the handle is reopened lazily on the next flush
        NvramFile {
            path: self.path.clone(),
            file: None,
            buffer: self.buffer.clone(),
        }
    }
}

impl NvramFile {
    /// Opens the backing file and reads whatever image it holds. With
    /// no path the image lives in memory only.
    pub fn open(path: Option<PathBuf>) -> RtcResult<NvramFile> {
        let mut buffer = Vec::new();
        let file = match &path {
            Some(path) => {
                let mut file = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)?;
                file.read_to_end(&mut buffer)?;
                debug!("backing file {:?} holds {} bytes", path, buffer.len());
                Some(file)
            }
            None => None,
        };
        Ok(NvramFile { path, file, buffer })
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Replaces the image and flushes it to the backing file, if any.
    pub fn update(&mut self, image: &[u8]) -> RtcResult<()> {
        self.buffer.clear();
        self.buffer.extend_from_slice(image);
        self.flush()
    }

    fn flush(&mut self) -> RtcResult<()> {
        if self.file.is_none() {
            if let Some(path) = &self.path {
                self.file = Some(
                    OpenOptions::new()
                        .read(true)
                        .write(true)
                        .create(true)
                        .open(path)?,
                );
            }
        }
        if let Some(file) = &mut self.file {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&self.buffer)?;
            file.set_len(self.buffer.len() as u64)?;
            file.flush()?;
        }
        Ok(())
    }
}

impl Ds1302 {
    /// Emits clock registers, user registers and RAM, in that order.
    pub fn nvram_snapshot(&self) -> Vec<u8> {
        let mut image = Vec::with_capacity(NUM_REGS * 2 + self.ram_size);
        image.extend_from_slice(&self.regs.raw());
        image.extend_from_slice(&self.user);
        image.extend_from_slice(&self.ram);
        image
    }

    /// Restores all three stores from an image laid out as
    /// [`nvram_snapshot`](Ds1302::nvram_snapshot) emits them.
    pub fn nvram_restore(&mut self, image: &[u8]) -> RtcResult<()> {
        let expected = NUM_REGS * 2 + self.ram_size;
        if image.len() != expected {
            return Err(RtcError::NvramImage(format!(
                "image is {} bytes, chip needs {}",
                image.len(),
                expected
            )));
        }
        self.regs.load(&image[..NUM_REGS]);
        self.user.copy_from_slice(&image[NUM_REGS..NUM_REGS * 2]);
        self.ram.copy_from_slice(&image[NUM_REGS * 2..]);
        Ok(())
    }

    /// First-use contents: zeroed clock, unprogrammed user mirror and
    /// RAM.
    pub fn nvram_default(&mut self) {
        self.regs.reset();
        self.user = [0xff; NUM_REGS];
        for byte in self.ram.iter_mut() {
            *byte = 0xff;
        }
    }

    pub fn attach_nvram(&mut self, nvram: NvramFile) {
        self.nvram = Some(nvram);
    }

    /// Writes the current image back to the attached backing store.
    pub fn nvram_flush(&mut self) -> RtcResult<()> {
        let image = self.nvram_snapshot();
        match &mut self.nvram {
            Some(nvram) => nvram.update(&image),
            None => Ok(()),
        }
    }
}
