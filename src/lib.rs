//! Logical emulation of the Dallas DS1302 Trickle-Charge Timekeeping
//! Chip and its reduced-RAM sibling, the DS1202: the 3-wire serial
//! protocol, the clock/calendar register bank, the battery-backed RAM
//! and the once-per-second timekeeping tick.

#[macro_use]
extern crate bitfield;

#[macro_use]
extern crate enum_primitive_derive;

#[macro_use]
extern crate log;

use std::error::Error;
use std::fmt;

mod builder;
mod chip;
mod nvram;
mod registers;
pub mod sched;
mod serial;

pub use builder::{ChipVariant, Ds1302Builder};
pub use chip::{Ds1302, DS1202_RAM_SIZE, DS1302_RAM_SIZE};
pub use nvram::NvramFile;
pub use registers::RegisterAddress;

#[derive(Debug)]
pub enum RtcError {
    IO(std::io::Error),
    NvramImage(String),
}

impl fmt::Display for RtcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error: {:?}", self)
    }
}

impl Error for RtcError {}

impl From<std::io::Error> for RtcError {
    fn from(err: std::io::Error) -> RtcError {
        RtcError::IO(err)
    }
}

pub type RtcResult<T> = Result<T, RtcError>;

pub mod prelude {
    pub use super::sched::{
        EventHandler, EventType, RtcEvent, Scheduler, SchedulerConnect, SharedScheduler,
        CYCLES_PER_SECOND,
    };
    pub use super::{
        ChipVariant, Ds1302, Ds1302Builder, NvramFile, RegisterAddress, RtcError, RtcResult,
    };
}
