use bit::BitIndex;
use chrono::prelude::*;
use num::FromPrimitive;
use serde::{Deserialize, Serialize};

use crate::nvram::NvramFile;
use crate::registers::{ClockRegisterBank, RegisterAddress, NUM_REGS};
use crate::sched::{
    EventHandler, EventType, RtcEvent, SchedulerConnect, SharedScheduler, CYCLES_PER_SECOND,
};
use crate::serial::ShiftRegister;

pub const DS1302_RAM_SIZE: usize = 31;
pub const DS1202_RAM_SIZE: usize = 24;

/// Command address 31 selects burst access instead of a single cell.
const BURST_ADDRESS: usize = 0x1f;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
enum Target {
    Clock,
    Ram,
}

/// A decoded command byte: bit 7 marks a valid command, bit 6 selects
/// RAM over the clock bank, bits 5-1 the address, bit 0 the direction.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
struct Command {
    target: Target,
    addr: usize,
    read: bool,
    burst: bool,
}

impl Command {
    fn decode(byte: u8) -> Option<Command> {
        if !byte.bit(7) {
            return None;
        }
        let addr = byte.bit_range(1..6) as usize;
        let burst = addr == BURST_ADDRESS;
        Some(Command {
            target: if byte.bit(6) {
                Target::Ram
            } else {
                Target::Clock
            },
            addr: if burst { 0 } else { addr },
            read: byte.bit(0),
            burst,
        })
    }

    /// The command addressing the next byte of the transfer: burst
    /// access auto-increments with wraparound, single-cell access stays
    /// put.
    fn advanced(self, ram_size: usize) -> Command {
        if !self.burst {
            return self;
        }
        let wrap = match self.target {
            Target::Ram => ram_size,
            Target::Clock => NUM_REGS,
        };
        Command {
            addr: (self.addr + 1) % wrap,
            ..self
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
enum ChipState {
    Idle,
    Command,
    DataIn(Command),
    DataOut(Command),
}

/// The DS1302 timekeeping chip. The DS1202 is the same engine with a
/// smaller RAM, built via [`Ds1302::new_ds1202`].
///
/// Hosts drive the chip exclusively through the line-level interface:
/// [`ce_w`](Ds1302::ce_w), [`sclk_w`](Ds1302::sclk_w),
/// [`io_w`](Ds1302::io_w) and [`io_r`](Ds1302::io_r). Data bits are
/// sampled on the rising clock edge and driven on the falling edge,
/// low bit first.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Ds1302 {
    pub(crate) ram_size: usize,

    ce: bool,
    sclk: bool,
    io: bool,

    state: ChipState,
    shifter: ShiftRegister,

    pub(crate) regs: ClockRegisterBank,
    pub(crate) user: [u8; NUM_REGS],
    pub(crate) ram: Vec<u8>,

    pub(crate) nvram: Option<NvramFile>,
    #[serde(skip)]
    scheduler: Option<SharedScheduler>,
}

impl Ds1302 {
    pub fn new() -> Ds1302 {
        Ds1302::with_ram_size(DS1302_RAM_SIZE)
    }

    pub fn new_ds1202() -> Ds1302 {
        Ds1302::with_ram_size(DS1202_RAM_SIZE)
    }

    fn with_ram_size(ram_size: usize) -> Ds1302 {
        Ds1302 {
            ram_size,
            ce: false,
            sclk: false,
            io: false,
            state: ChipState::Idle,
            shifter: ShiftRegister::new(),
            regs: ClockRegisterBank::new(),
            user: [0xff; NUM_REGS],
            ram: vec![0xff; ram_size],
            nvram: None,
            scheduler: None,
        }
    }

    pub fn ram_size(&self) -> usize {
        self.ram_size
    }

    pub fn set_century_base(&mut self, base: u16) {
        self.regs.set_century_base(base);
    }

    /// Chip-enable line. Assertion opens a transaction against a
    /// latched snapshot of the clock bank; deassertion discards any
    /// partial byte and returns to idle.
    pub fn ce_w(&mut self, level: bool) {
        if level == self.ce {
            return;
        }
        self.ce = level;

        if level {
            self.user = self.regs.raw();
            self.shifter.reset();
            self.state = ChipState::Command;
            trace!("enabled, awaiting command");
        } else {
            match self.state {
                ChipState::Command | ChipState::DataIn(_) if !self.shifter.is_empty() => {
                    debug!("disabled mid-byte in {:?}, discarding", self.state);
                }
                _ => {}
            }
            self.shifter.reset();
            self.state = ChipState::Idle;
        }
    }

    /// Serial clock line. Rising edges sample the I/O line, falling
    /// edges drive it. Ignored while chip-enable is low.
    pub fn sclk_w(&mut self, level: bool) {
        let rising = !self.sclk && level;
        let falling = self.sclk && !level;
        self.sclk = level;

        if !self.ce {
            return;
        }
        if rising {
            self.input_bit();
        } else if falling {
            self.output_bit();
        }
    }

    /// Host side of the bidirectional I/O line.
    pub fn io_w(&mut self, level: bool) {
        self.io = level;
    }

    /// Chip side of the bidirectional I/O line.
    pub fn io_r(&self) -> bool {
        self.io
    }

    fn input_bit(&mut self) {
        match self.state {
            ChipState::Command => {
                if let Some(byte) = self.shifter.shift_in(self.io) {
                    self.decode_command(byte);
                }
            }
            ChipState::DataIn(cmd) => {
                if let Some(byte) = self.shifter.shift_in(self.io) {
                    self.commit_write(cmd, byte);
                    self.state = ChipState::DataIn(cmd.advanced(self.ram_size));
                }
            }
            _ => {}
        }
    }

    fn output_bit(&mut self) {
        let cmd = match self.state {
            ChipState::DataOut(cmd) => cmd,
            _ => return,
        };
        if self.shifter.is_empty() {
            // byte exhausted: burst moves on, single-cell access
            // re-presents the same byte
            let next = cmd.advanced(self.ram_size);
            self.load_shift_register(next);
            self.state = ChipState::DataOut(next);
        }
        if let Some(bit) = self.shifter.shift_out() {
            self.io = bit;
        }
    }

    fn decode_command(&mut self, byte: u8) {
        match Command::decode(byte) {
            Some(cmd) => {
                debug!(
                    "{} {:?} addr {}{}",
                    if cmd.read { "READ" } else { "WRITE" },
                    cmd.target,
                    cmd.addr,
                    if cmd.burst { " (burst)" } else { "" }
                );
                if cmd.read {
                    self.load_shift_register(cmd);
                    self.state = ChipState::DataOut(cmd);
                } else {
                    self.state = ChipState::DataIn(cmd);
                }
            }
            None => {
                debug!("command byte {:#04x} lacks the marker bit, ignoring", byte);
                self.state = ChipState::Idle;
            }
        }
    }

    fn load_shift_register(&mut self, cmd: Command) {
        let byte = match cmd.target {
            Target::Ram => self.ram[cmd.addr % self.ram_size],
            Target::Clock => self.user[cmd.addr % NUM_REGS],
        };
        self.shifter.load(byte);
    }

    fn commit_write(&mut self, cmd: Command, byte: u8) {
        match cmd.target {
            Target::Ram => {
                self.ram[cmd.addr % self.ram_size] = byte;
            }
            Target::Clock => {
                let addr = cmd.addr % NUM_REGS;
                if self.regs.write_protected()
                    && addr != RegisterAddress::WriteProtect.index()
                {
                    debug!(
                        "write of {:#04x} to {:?} dropped, write-protect is set",
                        byte,
                        RegisterAddress::from_usize(addr)
                    );
                    return;
                }
                self.user[addr] = byte;
                self.regs.write(addr, byte);
            }
        }
    }

    /// One oscillator second. Fires from the scheduler; hosts keeping
    /// their own time base may call it directly instead.
    pub fn tick_second(&mut self) {
        if self.regs.clock_halted() {
            trace!("oscillator halted, tick skipped");
            return;
        }
        self.regs.advance_second();
    }

    /// Seeds the clock registers from the host's wall clock. Only ever
    /// used at setup; the protocol engine itself never consults host
    /// time.
    pub fn sync_to_wall_clock(&mut self) {
        let now: DateTime<Local> = Local::now();
        self.regs.seed_from_datetime(&now);
    }

    pub fn save_state(&self) -> bincode::Result<Vec<u8>> {
        bincode::serialize(self)
    }

    pub fn restore_state(bytes: &[u8]) -> bincode::Result<Ds1302> {
        bincode::deserialize(bytes)
    }
}

impl SchedulerConnect for Ds1302 {
    fn connect_scheduler(&mut self, scheduler: SharedScheduler) {
        let mut sched = scheduler.clone();
        sched.schedule(EventType::Rtc(RtcEvent::SecondTick), CYCLES_PER_SECOND);
        self.scheduler = Some(scheduler);
    }
}

impl EventHandler for Ds1302 {
    fn handle_event(&mut self, event: EventType, extra_cycles: usize) {
        match event {
            EventType::Rtc(RtcEvent::SecondTick) => {
                self.tick_second();
                if let Some(scheduler) = &mut self.scheduler {
                    scheduler.schedule(event, CYCLES_PER_SECOND.saturating_sub(extra_cycles));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip() -> Ds1302 {
        let mut chip = Ds1302::new();
        chip.nvram_default();
        chip
    }

    fn transmit_bit(chip: &mut Ds1302, bit: bool) {
        chip.io_w(bit);
        chip.sclk_w(true);
        chip.sclk_w(false);
    }

    fn transmit_byte(chip: &mut Ds1302, byte: u8) {
        for i in 0..8 {
            transmit_bit(chip, byte.bit(i));
        }
    }

    // The first output bit lands on the falling edge that ends the
    // command byte, so sample before each new clock pulse.
    fn receive_byte(chip: &mut Ds1302) -> u8 {
        let mut byte = 0u8;
        for i in 0..8 {
            byte.set_bit(i, chip.io_r());
            chip.sclk_w(true);
            chip.sclk_w(false);
        }
        byte
    }

    fn write_register(chip: &mut Ds1302, command: u8, value: u8) {
        chip.ce_w(true);
        transmit_byte(chip, command);
        transmit_byte(chip, value);
        chip.ce_w(false);
    }

    fn read_register(chip: &mut Ds1302, command: u8) -> u8 {
        chip.ce_w(true);
        transmit_byte(chip, command);
        let value = receive_byte(chip);
        chip.ce_w(false);
        value
    }

    #[test]
    fn hour_register_write_then_read() {
        let mut chip = chip();
        write_register(&mut chip, 0x84, 0x08); // hour = 8 AM, 24h format
        assert_eq!(read_register(&mut chip, 0x85), 0x08);
    }

    #[test]
    fn every_clock_register_round_trips() {
        let mut chip = chip();
        for addr in 0..NUM_REGS as u8 {
            let value = 0x10 | addr;
            write_register(&mut chip, 0x80 | (addr << 1), value);
            assert_eq!(read_register(&mut chip, 0x81 | (addr << 1)), value);
        }
    }

    #[test]
    fn ram_write_then_read() {
        let mut chip = chip();
        write_register(&mut chip, 0xC0, 0x5A); // RAM cell 0
        write_register(&mut chip, 0xFC, 0xA5); // RAM cell 30, the last
        assert_eq!(read_register(&mut chip, 0xC1), 0x5A);
        assert_eq!(read_register(&mut chip, 0xFD), 0xA5);
    }

    #[test]
    fn reads_are_idempotent() {
        let mut chip = chip();
        write_register(&mut chip, 0xC2, 0x77); // RAM cell 1
        assert_eq!(read_register(&mut chip, 0xC3), 0x77);
        assert_eq!(read_register(&mut chip, 0xC3), 0x77);

        // repeated clocking within one session re-presents the byte
        chip.ce_w(true);
        transmit_byte(&mut chip, 0xC3);
        assert_eq!(receive_byte(&mut chip), 0x77);
        assert_eq!(receive_byte(&mut chip), 0x77);
        chip.ce_w(false);
    }

    #[test]
    fn command_without_marker_bit_is_ignored() {
        let mut chip = chip();
        chip.ce_w(true);
        transmit_byte(&mut chip, 0x04);
        assert_eq!(chip.state, ChipState::Idle);

        // stray clocking afterwards must not corrupt anything
        transmit_byte(&mut chip, 0xff);
        chip.ce_w(false);
        assert_eq!(read_register(&mut chip, 0xC1), 0xff);
        assert_eq!(read_register(&mut chip, 0x81), 0x00);
    }

    #[test]
    fn ce_deassert_discards_partial_write() {
        let mut chip = chip();
        chip.ce_w(true);
        transmit_byte(&mut chip, 0xCA); // write RAM cell 5
        for _ in 0..4 {
            transmit_bit(&mut chip, true);
        }
        chip.ce_w(false);

        assert_eq!(read_register(&mut chip, 0xCB), 0xff);
    }

    #[test]
    fn write_protect_blocks_clock_writes() {
        let mut chip = chip();
        write_register(&mut chip, 0x8E, 0x80); // set WP
        write_register(&mut chip, 0x80, 0x25);
        assert_eq!(read_register(&mut chip, 0x81), 0x00);

        // RAM is not covered by write protection
        write_register(&mut chip, 0xC0, 0x44);
        assert_eq!(read_register(&mut chip, 0xC1), 0x44);

        // the write-protect register itself stays writable
        write_register(&mut chip, 0x8E, 0x00);
        write_register(&mut chip, 0x80, 0x25);
        assert_eq!(read_register(&mut chip, 0x81), 0x25);
    }

    #[test]
    fn out_of_range_clock_address_masks() {
        let mut chip = chip();
        write_register(&mut chip, 0x96, 0x08); // addr 11 masks to 2, the hour
        assert_eq!(read_register(&mut chip, 0x85), 0x08);
    }

    #[test]
    fn ds1202_masks_ram_addresses_to_its_size() {
        let mut chip = Ds1302::new_ds1202();
        chip.nvram_default();
        assert_eq!(chip.ram_size(), DS1202_RAM_SIZE);

        write_register(&mut chip, 0xFC, 0x42); // addr 30 masks to 6
        assert_eq!(read_register(&mut chip, 0xCD), 0x42);
    }

    #[test]
    fn clock_burst_reads_the_whole_bank() {
        let mut chip = chip();
        write_register(&mut chip, 0x84, 0x08);
        write_register(&mut chip, 0x86, 0x15);

        let mut bytes = [0u8; NUM_REGS];
        chip.ce_w(true);
        transmit_byte(&mut chip, 0xBF);
        for byte in bytes.iter_mut() {
            *byte = receive_byte(&mut chip);
        }
        chip.ce_w(false);

        assert_eq!(bytes[2], 0x08);
        assert_eq!(bytes[3], 0x15);
        assert_eq!(bytes[0], 0x00);
    }

    #[test]
    fn ram_burst_write_auto_increments() {
        let mut chip = chip();
        chip.ce_w(true);
        transmit_byte(&mut chip, 0xFE);
        transmit_byte(&mut chip, 0x11);
        transmit_byte(&mut chip, 0x22);
        transmit_byte(&mut chip, 0x33);
        chip.ce_w(false);

        assert_eq!(read_register(&mut chip, 0xC1), 0x11);
        assert_eq!(read_register(&mut chip, 0xC3), 0x22);
        assert_eq!(read_register(&mut chip, 0xC5), 0x33);
    }

    #[test]
    fn burst_address_wraps_around() {
        let mut chip = chip();
        chip.ce_w(true);
        transmit_byte(&mut chip, 0xFE);
        for _ in 0..DS1302_RAM_SIZE {
            transmit_byte(&mut chip, 0xAA);
        }
        transmit_byte(&mut chip, 0xBB); // wraps back to cell 0
        chip.ce_w(false);

        assert_eq!(read_register(&mut chip, 0xC1), 0xBB);
        assert_eq!(read_register(&mut chip, 0xC3), 0xAA);
    }

    #[test]
    fn session_reads_see_a_coherent_snapshot() {
        let mut chip = chip();

        chip.ce_w(true);
        chip.tick_second(); // lands mid-session
        transmit_byte(&mut chip, 0x81);
        assert_eq!(receive_byte(&mut chip), 0x00); // latched before the tick
        chip.ce_w(false);

        assert_eq!(read_register(&mut chip, 0x81), 0x01);
    }

    #[test]
    fn clock_halt_suspends_ticking() {
        let mut chip = chip();
        write_register(&mut chip, 0x80, 0x80); // CH bit
        chip.tick_second();
        assert_eq!(read_register(&mut chip, 0x81), 0x80);

        write_register(&mut chip, 0x80, 0x00);
        chip.tick_second();
        assert_eq!(read_register(&mut chip, 0x81), 0x01);
    }

    #[test]
    fn save_state_round_trips() {
        let mut chip = chip();
        write_register(&mut chip, 0xC0, 0x99);
        write_register(&mut chip, 0x84, 0x08);

        let bytes = chip.save_state().unwrap();
        let mut restored = Ds1302::restore_state(&bytes).unwrap();

        assert_eq!(read_register(&mut restored, 0xC1), 0x99);
        assert_eq!(read_register(&mut restored, 0x85), 0x08);
    }
}
