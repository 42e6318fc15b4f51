//! TELNET terminal device.
//!
//! A listener thread accepts a single TCP connection; a second
//! concurrent connect is told the line is busy and dropped.  On
//! connect the server announces `IAC WILL ECHO; IAC WILL
//! SUPPRESS-GO-AHEAD` and starts a reader and a writer thread.
//!
//! The reader strips inbound TELNET option negotiation with a
//! three-state machine {NORMAL, COMMAND, SUBNEG}; surviving data
//! bytes land in a 256-byte input ring.  A control word (loaded by
//! output transfer 3, high bits control, low byte threshold) selects
//! which characters echo back and which conditions raise the input
//! interrupt: any character, escape, return, or the buffer reaching
//! the threshold.  The ring rejects input with a BEL when full or
//! when the line is not enabled.
//!
//! Output is a one-byte rendezvous: transfer 1 loads the byte, a
//! start control wakes the writer thread.  Output completion raises
//! no interrupt; programs poll the busy bit.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::{event, Level};

use base::prelude::*;

use super::{Device, IrqLine, TRANSFER_STATUS};

const TELNET_SE: u8 = 0xF0;
const TELNET_SB: u8 = 0xFA;
const TELNET_IAC: u8 = 0xFF;

/// Control-word bits (the word's high bits; the low byte is the
/// interrupt threshold).
pub const LINE_ENABLED: u16 = 1 << 0;
pub const INTR_ANY: u16 = 1 << 1;
pub const INTR_ESC: u16 = 1 << 2;
pub const INTR_RET: u16 = 1 << 3;
pub const DESTRUCT: u16 = 1 << 4;
pub const BS_NO_ECHO: u16 = 1 << 5;
pub const ECHO_RET: u16 = 1 << 6;
pub const ECHO_TAB: u16 = 1 << 7;
pub const ECHO_ALL: u16 = 1 << 8;

pub const CONTROL_DEFAULTS: u16 = ECHO_ALL | ECHO_TAB | ECHO_RET | INTR_RET;

#[derive(Debug)]
struct Ring {
    buf: [u8; 256],
    rd: u8,
    wr: u8,
    len: u16,
    threshold: u8,
    control: u16,
}

#[derive(Debug)]
struct OutState {
    command: bool,
    done: bool,
    send: u8,
    shutdown: bool,
}

struct TtyShared {
    ring: Mutex<Ring>,
    ostate: Mutex<OutState>,
    write_cv: Condvar,
    conn: Mutex<Option<TcpStream>>,
    running: AtomicBool,
}

pub struct Tty {
    unit: u16,
    line: IrqLine,
    shared: Arc<TtyShared>,
    local_port: u16,
}

impl Tty {
    /// Bind the listener and start accepting.  A bind failure
    /// propagates so the caller can leave the device unregistered.
    pub fn new(unit: u16, line: IrqLine, port: u16) -> std::io::Result<Tty> {
        let listener = TcpListener::bind(("0.0.0.0", port))?;
        let local_port = listener.local_addr()?.port();
        let shared = Arc::new(TtyShared {
            ring: Mutex::new(Ring {
                buf: [0; 256],
                rd: 0,
                wr: 0,
                len: 0,
                threshold: 0,
                control: CONTROL_DEFAULTS,
            }),
            ostate: Mutex::new(OutState {
                command: false,
                done: false,
                send: 0,
                shutdown: false,
            }),
            write_cv: Condvar::new(),
            conn: Mutex::new(None),
            running: AtomicBool::new(false),
        });
        {
            let shared = Arc::clone(&shared);
            let line = line.clone();
            let _ = thread::Builder::new()
                .name(format!("tty-{unit:04o}-listen"))
                .spawn(move || run_listener(unit, shared, line, listener))
                .expect("spawning a device worker should not fail");
        }
        event!(
            Level::INFO,
            "unit {:04o} tty irq {:02o} port {}",
            unit,
            line.irq(),
            local_port
        );
        Ok(Tty {
            unit,
            line,
            shared,
            local_port,
        })
    }

    /// The bound TCP port (useful when the configuration asked for an
    /// ephemeral one).
    pub fn local_port(&self) -> u16 {
        self.local_port
    }
}

fn run_listener(unit: u16, shared: Arc<TtyShared>, line: IrqLine, listener: TcpListener) {
    for conn in listener.incoming() {
        let mut conn = match conn {
            Ok(conn) => conn,
            Err(e) => {
                event!(Level::WARN, "unit {:04o} tty accept error: {}", unit, e);
                return;
            }
        };
        if !shared.running.swap(true, Ordering::SeqCst) {
            // IAC WILL ECHO; IAC WILL SUPPRESS-GO-AHEAD.
            let _ = conn.write_all(&[255, 251, 1, 255, 251, 3]);
            let reader_conn = match conn.try_clone() {
                Ok(c) => c,
                Err(e) => {
                    event!(Level::WARN, "unit {:04o} tty clone error: {}", unit, e);
                    shared.running.store(false, Ordering::SeqCst);
                    continue;
                }
            };
            let writer_conn = match conn.try_clone() {
                Ok(c) => c,
                Err(e) => {
                    event!(Level::WARN, "unit {:04o} tty clone error: {}", unit, e);
                    shared.running.store(false, Ordering::SeqCst);
                    continue;
                }
            };
            *shared.conn.lock().unwrap() = Some(conn);
            {
                let shared = Arc::clone(&shared);
                let line = line.clone();
                let _ = thread::Builder::new()
                    .name(format!("tty-{unit:04o}-read"))
                    .spawn(move || run_reader(shared, line, reader_conn));
            }
            {
                let shared = Arc::clone(&shared);
                let _ = thread::Builder::new()
                    .name(format!("tty-{unit:04o}-write"))
                    .spawn(move || run_writer(shared, writer_conn));
            }
            event!(Level::INFO, "unit {:04o} tty connect", unit);
        } else {
            // The whole line, not a pointer's worth of it.
            let _ = conn.write_all(b"/TTY-E-BUSY\r\n");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TelnetState {
    Normal,
    Command,
    Subneg,
}

fn run_reader(shared: Arc<TtyShared>, line: IrqLine, mut conn: TcpStream) {
    let mut buf = [0_u8; 256];
    let mut state = TelnetState::Normal;
    loop {
        let n = match conn.read(&mut buf) {
            Ok(0) | Err(_) => break,
            Ok(n) => n,
        };
        for &byte in &buf[..n] {
            match state {
                TelnetState::Normal => {
                    if byte == TELNET_IAC {
                        state = TelnetState::Command;
                    } else {
                        push_char(&shared, &line, byte);
                    }
                }
                TelnetState::Command => {
                    if byte == TELNET_IAC {
                        // An escaped 0xFF data byte.
                        push_char(&shared, &line, byte);
                        state = TelnetState::Normal;
                    } else if byte == TELNET_SB {
                        state = TelnetState::Subneg;
                    } else if byte < 250 {
                        // Option verbs (WILL/WONT/DO/DONT) wait for
                        // their option byte; anything else ends the
                        // command.
                        state = TelnetState::Normal;
                    }
                }
                TelnetState::Subneg => {
                    if byte == TELNET_SE {
                        state = TelnetState::Normal;
                    }
                }
            }
        }
    }
    shared.running.store(false, Ordering::SeqCst);
    // Let the writer notice the line went away.
    shared.write_cv.notify_all();
}

/// Deliver one data byte to the input ring.
fn push_char(shared: &TtyShared, line: &IrqLine, ch: u8) {
    let mut ring = shared.ring.lock().unwrap();
    if ring.len < 255 && ring.control & LINE_ENABLED != 0 {
        let wr = ring.wr;
        ring.buf[wr as usize] = ch;
        ring.wr = wr.wrapping_add(1);
        ring.len += 1;

        let echo = ring.control & ECHO_ALL != 0
            || (ring.control & ECHO_TAB != 0 && ch == b'\t')
            || (ring.control & ECHO_RET != 0 && (ch == 0x0A || ch == 0x0D));
        if echo {
            if let Some(conn) = shared.conn.lock().unwrap().as_mut() {
                let _ = conn.write_all(&[ch]);
            }
        }

        let interrupt = ring.control & INTR_ANY != 0
            || (ring.control & INTR_ESC != 0 && ch == 0x1B)
            || (ring.control & INTR_RET != 0 && ch == 0x0A)
            || (ring.threshold > 0 && ring.len >= ring.threshold as u16);
        if interrupt {
            let mut st = shared.ostate.lock().unwrap();
            if !st.done {
                st.done = true;
                line.assert_irq();
            }
        }
    } else {
        // Full buffer or disabled line: ring the bell.
        if let Some(conn) = shared.conn.lock().unwrap().as_mut() {
            let _ = conn.write_all(b"\x07");
        }
    }
}

fn run_writer(shared: Arc<TtyShared>, mut conn: TcpStream) {
    loop {
        let byte;
        {
            let mut st = shared.ostate.lock().unwrap();
            while !st.command && !st.shutdown {
                st = shared.write_cv.wait(st).unwrap();
            }
            if st.shutdown || !shared.running.load(Ordering::SeqCst) {
                break;
            }
            byte = st.send;
            st.command = false;
        }
        if conn.write_all(&[byte]).is_err() {
            break;
        }
    }
}

impl Device for Tty {
    fn io(&mut self, acc: Word, ctl: u8, transfer: u8) -> Word {
        match transfer {
            1 => {
                self.shared.ostate.lock().unwrap().send = acc.bits() as u8;
            }
            3 => {
                let mut ring = self.shared.ring.lock().unwrap();
                ring.control = (acc.bits() >> 8) as u16;
                ring.threshold = acc.bits() as u8;
            }
            _ => {}
        }

        if transfer != TRANSFER_STATUS {
            match ctl {
                super::CTL_START => {
                    let mut st = self.shared.ostate.lock().unwrap();
                    st.command = true;
                    if st.done {
                        st.done = false;
                        self.line.release_irq();
                    }
                    self.shared.write_cv.notify_all();
                }
                super::CTL_STOP => {
                    let mut st = self.shared.ostate.lock().unwrap();
                    st.command = false;
                    if st.done {
                        st.done = false;
                        self.line.release_irq();
                    }
                }
                _ => {}
            }
        }

        match transfer {
            TRANSFER_STATUS => {
                let st = self.shared.ostate.lock().unwrap();
                Word::truncating(((st.done as u64) << 1) | st.command as u64)
            }
            0 => {
                let mut ring = self.shared.ring.lock().unwrap();
                if ring.len == 0 {
                    // All ones marks an empty buffer.
                    Word::MAX
                } else {
                    let rd = ring.rd;
                    let ch = ring.buf[rd as usize];
                    ring.rd = rd.wrapping_add(1);
                    ring.len -= 1;
                    Word::from(ch)
                }
            }
            _ => Word::ZERO,
        }
    }

    fn name(&self) -> String {
        format!("tty telnet line (unit {:04o}, port {})", self.unit, self.local_port)
    }
}

impl Drop for Tty {
    fn drop(&mut self) {
        {
            let mut st = self.shared.ostate.lock().unwrap();
            st.shutdown = true;
        }
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.write_cv.notify_all();
        if let Some(conn) = self.shared.conn.lock().unwrap().take() {
            let _ = conn.shutdown(std::net::Shutdown::Both);
        }
        // The listener thread stays parked in accept(2); it holds
        // only Arc references and dies with the process.
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::io::{CTL_START, STATUS_DONE};
    use std::time::Duration;

    fn connect(port: u16) -> TcpStream {
        let conn = TcpStream::connect(("127.0.0.1", port)).unwrap();
        conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        conn
    }

    fn read_exact(conn: &mut TcpStream, n: usize) -> Vec<u8> {
        let mut buf = vec![0; n];
        conn.read_exact(&mut buf).unwrap();
        buf
    }

    fn make_tty() -> (Arc<Bus>, Tty) {
        let bus = Arc::new(Bus::new(1024));
        bus.intr.set_mask(0xFFFF);
        let line = IrqLine::new(Arc::clone(&bus), 4);
        let tty = Tty::new(0o20, line, 0).unwrap();
        (bus, tty)
    }

    #[test]
    fn negotiates_buffers_and_echoes() {
        let (bus, mut tty) = make_tty();
        let mut client = connect(tty.local_port());

        assert_eq!(read_exact(&mut client, 6), vec![255, 251, 1, 255, 251, 3]);

        // Enable the line with interrupt-on-any and echo-all;
        // threshold unused.
        let control = (LINE_ENABLED | INTR_ANY | ECHO_ALL) as u64;
        tty.io(Word::truncating(control << 8), 0, 3);

        // A data byte wrapped around option negotiation noise.
        client
            .write_all(&[255, 253, 1, b'A', 255, 250, 0, 1, 2, 255, 240])
            .unwrap();

        // Wait for the interrupt.
        for _ in 0..500 {
            if u64::from(tty.io(Word::ZERO, 0, TRANSFER_STATUS)) & STATUS_DONE != 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(bus.intr.min_pending(), 4);
        assert_eq!(u64::from(tty.io(Word::ZERO, 0, 0)), b'A' as u64);
        // Ring is empty again.
        assert_eq!(tty.io(Word::ZERO, 0, 0), Word::MAX);
        // The byte echoed back.
        assert_eq!(read_exact(&mut client, 1), vec![b'A']);
    }

    #[test]
    fn writes_bytes_through_the_writer_thread() {
        let (_bus, mut tty) = make_tty();
        let mut client = connect(tty.local_port());
        let _ = read_exact(&mut client, 6);

        tty.io(Word::from(b'Z'), CTL_START, 1);
        assert_eq!(read_exact(&mut client, 1), vec![b'Z']);
    }

    #[test]
    fn second_connection_is_rejected_busy() {
        let (_bus, tty) = make_tty();
        let mut first = connect(tty.local_port());
        let _ = read_exact(&mut first, 6);

        let mut second = connect(tty.local_port());
        let mut buf = Vec::new();
        let mut tmp = [0_u8; 64];
        loop {
            match second.read(&mut tmp) {
                Ok(0) | Err(_) => break,
                Ok(n) => buf.extend_from_slice(&tmp[..n]),
            }
        }
        assert_eq!(buf, b"/TTY-E-BUSY\r\n".to_vec());
    }
}
