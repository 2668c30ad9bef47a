//! # Driver
//!
//! Picks a back-end, falling back through [`AUTO_ORDER`] in auto mode, and
//! runs the acquire / render / present loop until the back-end says stop.

use std::io::Write;

use thiserror::Error;

use crate::backend::{AcquireResult, Backend, BackendError, FrameCycle, PresentResult};
use crate::core::config::{CubeConfig, DisplayMode};

/// Back-ends tried by auto mode, in order
pub const AUTO_ORDER: [DisplayMode; 4] = [
    DisplayMode::Wayland,
    DisplayMode::Xcb,
    DisplayMode::Kms,
    DisplayMode::Headless,
];

/// Errors that end the program
#[derive(Error, Debug)]
pub enum DriverError {
    /// No back-end could be initialised
    #[error("failed to initialize {mode}: {source}")]
    NoBackend {
        /// Last mode tried
        mode: DisplayMode,
        /// Why it failed
        #[source]
        source: BackendError,
    },

    /// The running back-end failed
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Initialise the back-end `config` asks for
///
/// Auto mode announces every fallback on stderr.
pub fn init_display(config: &CubeConfig) -> Result<Backend, DriverError> {
    let mut stderr = std::io::stderr();
    init_with_fallback(config.display_mode, |mode| Backend::init(mode, config), &mut stderr)
}

/// Resolve `mode` with `init`, walking [`AUTO_ORDER`] when it is `Auto`
///
/// Only initialisation errors move on to the next mode; anything else is
/// reported against the mode that raised it.
pub fn init_with_fallback<T>(
    mode: DisplayMode,
    mut init: impl FnMut(DisplayMode) -> Result<T, BackendError>,
    announce: &mut impl Write,
) -> Result<T, DriverError> {
    if mode != DisplayMode::Auto {
        return init(mode).map_err(|source| DriverError::NoBackend { mode, source });
    }

    let mut candidates = AUTO_ORDER.iter().copied().peekable();
    while let Some(candidate) = candidates.next() {
        match init(candidate) {
            Ok(backend) => {
                log::info!("Using {} back-end", candidate);
                return Ok(backend);
            }
            Err(source) => {
                log::debug!("{} initialisation failed: {}", candidate, source);
                match candidates.peek() {
                    Some(next) if source.is_recoverable() => {
                        let _ = writeln!(
                            announce,
                            "failed to initialize {}, falling back to {}",
                            candidate, next
                        );
                    }
                    _ => {
                        return Err(DriverError::NoBackend {
                            mode: candidate,
                            source,
                        })
                    }
                }
            }
        }
    }

    Err(DriverError::NoBackend {
        mode: DisplayMode::Headless,
        source: BackendError::Init("no back-end available".to_string()),
    })
}

/// Run the frame loop until the back-end quits; returns the frames presented
pub fn run_frames(cycle: &mut impl FrameCycle) -> Result<u64, DriverError> {
    let mut frames = 0u64;

    loop {
        match cycle.acquire()? {
            AcquireResult::Image(index) => {
                cycle.render(index)?;
                match cycle.present(index)? {
                    PresentResult::Presented => frames += 1,
                    PresentResult::Resize => {
                        log::debug!("Image set went stale on present, rebuilding");
                        cycle.resize()?;
                    }
                }
            }
            AcquireResult::Retry => {}
            AcquireResult::Resize => {
                log::debug!("Image set went stale on acquire, rebuilding");
                cycle.resize()?;
            }
            AcquireResult::Quit => break,
            AcquireResult::Fatal => {
                log::error!("Presentation failed, stopping");
                break;
            }
        }
    }

    log::debug!("Presented {} frames", frames);
    Ok(frames)
}

/// Run `backend` to completion, then tear it down
pub fn run(mut backend: Backend) -> Result<(), DriverError> {
    log::debug!("Running {} back-end", backend.mode());
    run_frames(&mut backend)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendResult;
    use std::collections::VecDeque;

    fn fail_until(
        working: DisplayMode,
    ) -> impl FnMut(DisplayMode) -> Result<DisplayMode, BackendError> {
        move |mode| {
            if mode == working {
                Ok(mode)
            } else {
                Err(BackendError::Init(format!("no {}", mode)))
            }
        }
    }

    #[test]
    fn test_auto_falls_back_to_headless() {
        let mut announced = Vec::new();
        let chosen = init_with_fallback(DisplayMode::Auto, fail_until(DisplayMode::Headless), &mut announced).unwrap();

        assert_eq!(chosen, DisplayMode::Headless);
        assert_eq!(
            String::from_utf8(announced).unwrap(),
            "failed to initialize wayland, falling back to xcb\n\
             failed to initialize xcb, falling back to kms\n\
             failed to initialize kms, falling back to headless\n"
        );
    }

    #[test]
    fn test_auto_stops_at_first_working_backend() {
        let mut tried = Vec::new();
        let mut announced = Vec::new();
        let chosen = init_with_fallback(
            DisplayMode::Auto,
            |mode| {
                tried.push(mode);
                fail_until(DisplayMode::Xcb)(mode)
            },
            &mut announced,
        )
        .unwrap();

        assert_eq!(chosen, DisplayMode::Xcb);
        assert_eq!(tried, vec![DisplayMode::Wayland, DisplayMode::Xcb]);
        assert_eq!(
            String::from_utf8(announced).unwrap(),
            "failed to initialize wayland, falling back to xcb\n"
        );
    }

    #[test]
    fn test_fatal_error_does_not_fall_back() {
        let mut announced = Vec::new();
        let result = init_with_fallback(
            DisplayMode::Auto,
            |_| -> Result<(), BackendError> {
                Err(BackendError::Protocol("Compositor is missing xdg_wm_base protocol support".to_string()))
            },
            &mut announced,
        );

        match result {
            Err(DriverError::NoBackend { mode, .. }) => assert_eq!(mode, DisplayMode::Wayland),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
        assert!(announced.is_empty());
    }

    #[test]
    fn test_explicit_mode_never_falls_back() {
        let mut announced = Vec::new();
        let err = init_with_fallback(DisplayMode::Xcb, fail_until(DisplayMode::Headless), &mut announced)
            .unwrap_err();

        assert_eq!(err.to_string(), "failed to initialize xcb: no xcb");
        assert!(announced.is_empty());
    }

    #[test]
    fn test_headless_failure_in_auto_is_reported() {
        let mut announced = Vec::new();
        let err = init_with_fallback(DisplayMode::Auto, fail_until(DisplayMode::Auto), &mut announced)
            .unwrap_err();

        assert!(matches!(err, DriverError::NoBackend { mode: DisplayMode::Headless, .. }));
    }

    /// Frame cycle that replays scripted acquire and present results
    #[derive(Default)]
    struct ScriptedCycle {
        acquires: VecDeque<AcquireResult>,
        presents: VecDeque<PresentResult>,
        rendered: Vec<u32>,
        resizes: u32,
    }

    impl FrameCycle for ScriptedCycle {
        fn acquire(&mut self) -> BackendResult<AcquireResult> {
            Ok(self.acquires.pop_front().unwrap_or(AcquireResult::Quit))
        }

        fn render(&mut self, index: u32) -> BackendResult<()> {
            self.rendered.push(index);
            Ok(())
        }

        fn present(&mut self, _index: u32) -> BackendResult<PresentResult> {
            Ok(self.presents.pop_front().unwrap_or(PresentResult::Presented))
        }

        fn resize(&mut self) -> BackendResult<()> {
            self.resizes += 1;
            Ok(())
        }
    }

    #[test]
    fn test_loop_renders_acquired_images() {
        let mut cycle = ScriptedCycle {
            acquires: VecDeque::from([
                AcquireResult::Image(0),
                AcquireResult::Retry,
                AcquireResult::Image(1),
                AcquireResult::Quit,
            ]),
            ..Default::default()
        };

        assert_eq!(run_frames(&mut cycle).unwrap(), 2);
        assert_eq!(cycle.rendered, vec![0, 1]);
        assert_eq!(cycle.resizes, 0);
    }

    #[test]
    fn test_stale_image_set_is_rebuilt() {
        let mut cycle = ScriptedCycle {
            acquires: VecDeque::from([
                AcquireResult::Resize,
                AcquireResult::Image(0),
                AcquireResult::Image(1),
            ]),
            presents: VecDeque::from([PresentResult::Resize]),
            ..Default::default()
        };

        assert_eq!(run_frames(&mut cycle).unwrap(), 1);
        assert_eq!(cycle.resizes, 2);
    }

    #[test]
    fn test_fatal_acquire_stops_cleanly() {
        let mut cycle = ScriptedCycle {
            acquires: VecDeque::from([AcquireResult::Fatal, AcquireResult::Image(0)]),
            ..Default::default()
        };

        assert_eq!(run_frames(&mut cycle).unwrap(), 0);
        assert!(cycle.rendered.is_empty());
    }
}
