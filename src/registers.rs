use std::cmp;

use chrono::prelude::*;
use serde::{Deserialize, Serialize};

/// Register addresses as encoded in bits 5-1 of a command byte.
#[derive(Primitive, Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub enum RegisterAddress {
    Seconds = 0,
    Minutes = 1,
    Hour = 2,
    Date = 3,
    Month = 4,
    DayOfWeek = 5,
    Year = 6,
    WriteProtect = 7,
    TrickleCharge = 8,
}

impl RegisterAddress {
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

pub(crate) const NUM_REGS: usize = 9;

pub(crate) fn num2bcd(mut num: u8) -> u8 {
    num = cmp::min(num, 99);
    ((num / 10) << 4) | (num % 10)
}

pub(crate) fn bcd2num(bcd: u8) -> u8 {
    (bcd >> 4) * 10 + (bcd & 0x0f)
}

bitfield! {
    /// Seconds register: clock-halt flag plus BCD seconds.
    #[derive(Serialize, Deserialize, Clone, Copy)]
    pub struct SecondsReg(u8);
    impl Debug;
    u8;
    pub clock_halt, set_clock_halt: 7;
    pub bcd_seconds, set_bcd_seconds: 6, 0;
}

bitfield! {
    /// Hour register. Bit 7 selects 12-hour mode; in that mode bit 5
    /// carries AM/PM and the BCD field counts 1 to 12.
    #[derive(Serialize, Deserialize, Clone, Copy)]
    pub struct HourReg(u8);
    impl Debug;
    u8;
    pub mode_12h, set_mode_12h: 7;
    pub pm, set_pm: 5;
    pub bcd_hour_12h, set_bcd_hour_12h: 4, 0;
    pub bcd_hour_24h, set_bcd_hour_24h: 5, 0;
}

bitfield! {
    #[derive(Serialize, Deserialize, Clone, Copy)]
    pub struct WriteProtectReg(u8);
    impl Debug;
    u8;
    pub protect, set_protect: 7;
}

fn is_leap_year(year: u16) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

fn days_in_month(month: u8, year: u16) -> u8 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 31,
    }
}

/// The live clock/calendar bank: 9 bytes in command-address order.
///
/// The year is stored modulo 100; `century_base` anchors it for the
/// Gregorian leap rule.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub(crate) struct ClockRegisterBank {
    regs: [u8; NUM_REGS],
    century_base: u16,
}

impl ClockRegisterBank {
    pub fn new() -> ClockRegisterBank {
        ClockRegisterBank {
            regs: [0; NUM_REGS],
            century_base: 2000,
        }
    }

    pub fn raw(&self) -> [u8; NUM_REGS] {
        self.regs
    }

    pub fn load(&mut self, bytes: &[u8]) {
        self.regs.copy_from_slice(bytes);
    }

    pub fn reset(&mut self) {
        self.regs = [0; NUM_REGS];
    }

    pub fn write(&mut self, addr: usize, value: u8) {
        self.regs[addr % NUM_REGS] = value;
    }

    pub fn clock_halted(&self) -> bool {
        SecondsReg(self.regs[RegisterAddress::Seconds.index()]).clock_halt()
    }

    pub fn write_protected(&self) -> bool {
        WriteProtectReg(self.regs[RegisterAddress::WriteProtect.index()]).protect()
    }

    pub fn set_century_base(&mut self, base: u16) {
        self.century_base = base;
    }

    /// One second of wall time: BCD increment with carry through
    /// minutes, hour, date, month and year.
    pub fn advance_second(&mut self) {
        let mut sec = SecondsReg(self.regs[RegisterAddress::Seconds.index()]);
        let s = bcd2num(sec.bcd_seconds()) + 1;
        if s < 60 {
            sec.set_bcd_seconds(num2bcd(s));
            self.regs[RegisterAddress::Seconds.index()] = sec.0;
            return;
        }
        sec.set_bcd_seconds(0);
        self.regs[RegisterAddress::Seconds.index()] = sec.0;

        let m = bcd2num(self.regs[RegisterAddress::Minutes.index()] & 0x7f) + 1;
        if m < 60 {
            self.regs[RegisterAddress::Minutes.index()] = num2bcd(m);
            return;
        }
        self.regs[RegisterAddress::Minutes.index()] = 0;

        if self.advance_hour() {
            self.advance_date();
        }
    }

    /// Returns true when the hour wrapped into a new day.
    fn advance_hour(&mut self) -> bool {
        let mut hour = HourReg(self.regs[RegisterAddress::Hour.index()]);
        let rollover;
        if hour.mode_12h() {
            // 12, 1, .. 11, then 12 again with the meridiem flipped;
            // the 11 PM to 12 AM flip starts a new date
            let h = bcd2num(hour.bcd_hour_12h());
            let next = if h >= 12 { 1 } else { h + 1 };
            rollover = if next == 12 {
                let was_pm = hour.pm();
                hour.set_pm(!was_pm);
                was_pm
            } else {
                false
            };
            hour.set_bcd_hour_12h(num2bcd(next));
        } else {
            let h = bcd2num(hour.bcd_hour_24h()) + 1;
            rollover = h >= 24;
            hour.set_bcd_hour_24h(num2bcd(if rollover { 0 } else { h }));
        }
        self.regs[RegisterAddress::Hour.index()] = hour.0;
        rollover
    }

    fn advance_date(&mut self) {
        let dow = bcd2num(self.regs[RegisterAddress::DayOfWeek.index()]);
        self.regs[RegisterAddress::DayOfWeek.index()] =
            num2bcd(if dow >= 7 { 1 } else { dow + 1 });

        let year = u16::from(bcd2num(self.regs[RegisterAddress::Year.index()]));
        let month = bcd2num(self.regs[RegisterAddress::Month.index()]);
        let date = bcd2num(self.regs[RegisterAddress::Date.index()]) + 1;

        if date <= days_in_month(month, self.century_base + year) {
            self.regs[RegisterAddress::Date.index()] = num2bcd(date);
            return;
        }
        self.regs[RegisterAddress::Date.index()] = num2bcd(1);

        if month < 12 {
            self.regs[RegisterAddress::Month.index()] = num2bcd(month + 1);
            return;
        }
        self.regs[RegisterAddress::Month.index()] = num2bcd(1);
        self.regs[RegisterAddress::Year.index()] = num2bcd(((year + 1) % 100) as u8);
    }

    /// Overwrites the calendar from a host-supplied time of day. The
    /// 12/24-hour selection already in the hour register is kept.
    pub fn seed_from_datetime(&mut self, t: &DateTime<Local>) {
        let year = t.year();
        self.century_base = (year - year % 100) as u16;

        let mut sec = SecondsReg(self.regs[RegisterAddress::Seconds.index()]);
        sec.set_clock_halt(false);
        sec.set_bcd_seconds(num2bcd(t.second() as u8));
        self.regs[RegisterAddress::Seconds.index()] = sec.0;

        self.regs[RegisterAddress::Minutes.index()] = num2bcd(t.minute() as u8);

        let mut hour = HourReg(self.regs[RegisterAddress::Hour.index()]);
        if hour.mode_12h() {
            let (pm, hour12) = t.hour12();
            hour.set_pm(pm);
            hour.set_bcd_hour_12h(num2bcd(hour12 as u8));
        } else {
            hour.set_bcd_hour_24h(num2bcd(t.hour() as u8));
        }
        self.regs[RegisterAddress::Hour.index()] = hour.0;

        self.regs[RegisterAddress::Date.index()] = num2bcd(t.day() as u8);
        self.regs[RegisterAddress::Month.index()] = num2bcd(t.month() as u8);
        self.regs[RegisterAddress::DayOfWeek.index()] =
            num2bcd(t.weekday().number_from_monday() as u8);
        self.regs[RegisterAddress::Year.index()] = num2bcd((year % 100) as u8);
    }
}
