//! Virtual-terminal control for the KMS back-end
//!
//! While the cube owns the screen the console is in raw input mode, the
//! kernel text console is switched off (`KD_GRAPHICS`) and VT switching is
//! blocked (`VT_PROCESS` with no release/acquire signals), since DRM master
//! is never dropped. [`VtGuard`] undoes all three on drop, and a handler on
//! SIGINT, SIGSEGV and SIGABRT undoes them before re-raising the signal.

use std::os::raw::{c_char, c_int, c_short};
use std::sync::OnceLock;

use super::{BackendError, BackendResult};

const KDSETMODE: u32 = 0x4B3A;
const KD_TEXT: c_int = 0x00;
const KD_GRAPHICS: c_int = 0x01;

const VT_SETMODE: u32 = 0x5602;
const VT_AUTO: c_char = 0x00;
const VT_PROCESS: c_char = 0x01;

/// Major device number of the virtual consoles
const TTY_MAJOR: u32 = 4;

/// `struct vt_mode` from `<linux/vt.h>`
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct VtMode {
    mode: c_char,
    waitv: c_char,
    relsig: c_short,
    acqsig: c_short,
    frsig: c_short,
}

/// Terminal attributes saved before entering raw mode
static SAVED_TERMIOS: OnceLock<libc::termios> = OnceLock::new();

/// Put the console back the way it was
///
/// Runs from a signal handler: only two ioctls and one `tcsetattr`.
fn restore_vt() {
    let mode = VtMode {
        mode: VT_AUTO,
        ..VtMode::default()
    };
    unsafe {
        libc::ioctl(libc::STDIN_FILENO, VT_SETMODE as _, &mode);
        if let Some(tio) = SAVED_TERMIOS.get() {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, tio);
        }
        libc::ioctl(libc::STDIN_FILENO, KDSETMODE as _, KD_TEXT);
    }
}

extern "C" fn handle_signal(sig: c_int) {
    restore_vt();
    // SA_RESETHAND put the default action back
    unsafe {
        libc::raise(sig);
    }
}

fn is_vt(rdev: libc::dev_t) -> bool {
    libc::major(rdev) == TTY_MAJOR
}

/// Console taken over for graphics; restored on drop
#[derive(Debug)]
pub struct VtGuard {
    _private: (),
}

impl VtGuard {
    /// Take over the console on stdin
    ///
    /// Fails with an initialisation error when stdin is not a virtual
    /// terminal, so auto mode moves on to the next back-end.
    pub fn acquire() -> BackendResult<Self> {
        let mut tio = unsafe { std::mem::zeroed::<libc::termios>() };
        unsafe {
            libc::tcgetattr(libc::STDIN_FILENO, &mut tio);
        }

        let mut stat = unsafe { std::mem::zeroed::<libc::stat>() };
        if unsafe { libc::fstat(libc::STDIN_FILENO, &mut stat) } == -1 {
            return Err(BackendError::Init(format!(
                "failed to stat stdin: {}",
                std::io::Error::last_os_error()
            )));
        }

        if !is_vt(stat.st_rdev) {
            eprintln!("stdin not a vt, running in no-display mode");
            return Err(BackendError::Init("stdin is not a virtual terminal".to_string()));
        }

        let _ = SAVED_TERMIOS.set(tio);
        let guard = Self { _private: () };

        let mut raw = tio;
        raw.c_lflag &= !(libc::ICANON | libc::ECHO);
        unsafe {
            libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &raw);
        }

        install_signal_handlers();

        let mode = VtMode {
            mode: VT_PROCESS,
            ..VtMode::default()
        };
        if unsafe { libc::ioctl(libc::STDIN_FILENO, VT_SETMODE as _, &mode) } == -1 {
            return Err(BackendError::Io(std::io::Error::last_os_error()));
        }
        if unsafe { libc::ioctl(libc::STDIN_FILENO, KDSETMODE as _, KD_GRAPHICS) } == -1 {
            return Err(BackendError::Io(std::io::Error::last_os_error()));
        }

        log::debug!("Console switched to graphics mode");
        Ok(guard)
    }
}

impl Drop for VtGuard {
    fn drop(&mut self) {
        restore_vt();
    }
}

fn install_signal_handlers() {
    unsafe {
        let mut action = std::mem::zeroed::<libc::sigaction>();
        action.sa_sigaction = handle_signal as libc::sighandler_t;
        action.sa_flags = libc::SA_RESETHAND;
        libc::sigemptyset(&mut action.sa_mask);

        for signal in [libc::SIGINT, libc::SIGSEGV, libc::SIGABRT] {
            libc::sigaction(signal, &action, std::ptr::null_mut());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vt_mode_matches_kernel_layout() {
        assert_eq!(std::mem::size_of::<VtMode>(), 8);
    }

    #[test]
    fn test_console_major_is_recognised() {
        assert!(is_vt(libc::makedev(TTY_MAJOR, 1)));
        assert!(!is_vt(libc::makedev(136, 0)));
    }
}
