//! UART console for firmware diagnostics.
//!
//! Writes to the 16550-compatible UART of the system-on-chip, polling the
//! line status register before each byte. A spin mutex serializes whole
//! messages. The completion interrupt handler never prints, so the lock is
//! only ever taken from the main flow.

use core::fmt;
use dsq_common::mmio::UART0_BASE;
use spin::Mutex;

/// Transmit holding register.
const THR: usize = 0;
/// Line control register.
const LCR: usize = 3;
/// Line status register.
const LSR: usize = 5;
/// Transmit holding register empty.
const LSR_THRE: u8 = 1 << 5;

/// 16550 UART transmitter.
pub struct Uart {
    base: usize,
}

impl Uart {
    fn reg(&self, offset: usize) -> *mut u8 {
        (self.base + offset) as *mut u8
    }

    fn put(&mut self, byte: u8) {
        unsafe {
            while self.reg(LSR).read_volatile() & LSR_THRE == 0 {
                core::hint::spin_loop();
            }
            self.reg(THR).write_volatile(byte);
        }
    }
}

impl fmt::Write for Uart {
    /// Converts `\n` to `\r\n` for terminal display.
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.bytes() {
            if c == b'\n' {
                self.put(b'\r');
            }
            self.put(c);
        }
        Ok(())
    }
}

static CONSOLE: Mutex<Uart> = Mutex::new(Uart { base: UART0_BASE });

/// Sets the line format to 8 data bits, no parity, one stop bit.
pub fn init() {
    let uart = CONSOLE.lock();
    unsafe { uart.reg(LCR).write_volatile(0x03) };
}

#[doc(hidden)]
pub fn _print(args: fmt::Arguments) {
    use fmt::Write;
    let _ = CONSOLE.lock().write_fmt(args);
}

/// Prints a line to the console.
///
/// ```ignore
/// println!("Value: {}", 42);
/// ```
#[macro_export]
macro_rules! println {
    ($($arg:tt)*) => ({
        $crate::console::_print(format_args!("{}\n", format_args!($($arg)*)));
    });
}
pub use println;
