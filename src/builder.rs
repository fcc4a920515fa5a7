use std::path::{Path, PathBuf};

use crate::chip::Ds1302;
use crate::nvram::NvramFile;
use crate::RtcResult;

#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ChipVariant {
    Ds1302,
    Ds1202,
}

/// Assembles a chip instance: variant, optional nonvolatile backing
/// file, optional wall-clock seeding.
///
/// ```no_run
/// use ds1302_core::Ds1302Builder;
///
/// let chip = Ds1302Builder::new()
///     .nvram_path("clock.nv".as_ref())
///     .sync_to_wall_clock()
///     .build()
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct Ds1302Builder {
    variant: ChipVariant,
    nvram_path: Option<PathBuf>,
    sync_wall_clock: bool,
    century_base: u16,
}

impl Ds1302Builder {
    pub fn new() -> Ds1302Builder {
        Ds1302Builder {
            variant: ChipVariant::Ds1302,
            nvram_path: None,
            sync_wall_clock: false,
            century_base: 2000,
        }
    }

    pub fn variant(mut self, variant: ChipVariant) -> Self {
        self.variant = variant;
        self
    }

    pub fn ds1202(mut self) -> Self {
        self.variant = ChipVariant::Ds1202;
        self
    }

    pub fn nvram_path(mut self, path: &Path) -> Self {
        self.nvram_path = Some(path.to_path_buf());
        self
    }

    pub fn sync_to_wall_clock(mut self) -> Self {
        self.sync_wall_clock = true;
        self
    }

    /// Century anchoring the two-digit year register, for the leap-year
    /// rule. Ignored when wall-clock seeding is on.
    pub fn century_base(mut self, base: u16) -> Self {
        self.century_base = base;
        self
    }

    pub fn build(self) -> RtcResult<Ds1302> {
        let mut chip = match self.variant {
            ChipVariant::Ds1302 => Ds1302::new(),
            ChipVariant::Ds1202 => Ds1302::new_ds1202(),
        };
        chip.set_century_base(self.century_base);

        let nvram = NvramFile::open(self.nvram_path)?;
        if nvram.is_empty() {
            info!("no prior nvram image, starting from defaults");
            chip.nvram_default();
        } else if let Err(err) = chip.nvram_restore(nvram.bytes()) {
            warn!("discarding stored nvram image: {}", err);
            chip.nvram_default();
        }
        chip.attach_nvram(nvram);

        if self.sync_wall_clock {
            chip.sync_to_wall_clock();
        }

        Ok(chip)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::{DS1202_RAM_SIZE, DS1302_RAM_SIZE};

    #[test]
    fn builds_a_ds1302_with_default_contents() {
        let chip = Ds1302Builder::new().build().unwrap();
        assert_eq!(chip.ram_size(), DS1302_RAM_SIZE);

        let image = chip.nvram_snapshot();
        assert!(image[..9].iter().all(|&b| b == 0x00));
        assert!(image[9..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn builds_the_reduced_ram_variant() {
        let chip = Ds1302Builder::new().ds1202().build().unwrap();
        assert_eq!(chip.ram_size(), DS1202_RAM_SIZE);
        assert_eq!(chip.nvram_snapshot().len(), 18 + DS1202_RAM_SIZE);
    }

    #[test]
    fn image_of_the_wrong_size_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("ds1302-short-{}.nv", std::process::id()));
        let _ = std::fs::remove_file(&path);
        std::fs::write(&path, [0x42u8; 10]).unwrap();

        let chip = Ds1302Builder::new().nvram_path(&path).build().unwrap();
        assert!(chip.nvram_snapshot()[9..].iter().all(|&b| b == 0xff));

        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn restores_a_prior_image_from_disk() {
        let path = std::env::temp_dir().join(format!("ds1302-build-{}.nv", std::process::id()));
        let _ = std::fs::remove_file(&path);

        {
            let mut chip = Ds1302Builder::new().nvram_path(&path).build().unwrap();
            chip.ram[0] = 0x42;
            chip.nvram_flush().unwrap();
        }
        {
            let chip = Ds1302Builder::new().nvram_path(&path).build().unwrap();
            assert_eq!(chip.ram[0], 0x42);
        }

        let _ = std::fs::remove_file(&path);
    }
}
