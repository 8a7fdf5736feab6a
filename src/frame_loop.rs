// =============================================================================
// FRAME LOOP - fixed-rate tick -> check close -> poll -> acquire -> present
// =============================================================================
//
// Single-threaded. The loop only talks to the window and the renderer
// through the two traits below, so it runs the same against mocks.

use anyhow::Result;
use std::thread;
use std::time::{Duration, Instant};

use crate::backend::AcquiredImage;
use crate::error::FrameError;

/// The windowing side of the loop
pub trait EventSource {
    /// True once the user asked to close (close button, Escape)
    fn close_requested(&self) -> bool;

    /// Pump pending OS events without blocking
    fn poll_events(&mut self);

    /// Destroy the window, then shut the windowing library down
    fn shutdown(self);
}

/// The graphics side of the loop
pub trait FrameTarget {
    fn acquire_next_image(&mut self) -> Result<AcquiredImage>;

    fn present_image(&mut self, index: u32) -> Result<()>;

    /// Destroy application resources, then the graphics context
    fn shutdown(self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Exiting,
}

/// Sleeps until fixed deadlines `period` apart.
///
/// A tick never fires early. When the caller falls behind, the schedule
/// restarts from now instead of bursting to catch up.
pub struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn wait(&mut self) {
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
        }

        self.next += self.period;
        let now = Instant::now();
        if self.next <= now {
            self.next = now + self.period;
        }
    }
}

pub struct FrameLoop<E: EventSource, T: FrameTarget> {
    events: E,
    target: T,
    ticker: Ticker,
    state: LoopState,
    frames: u64,
}

impl<E: EventSource, T: FrameTarget> FrameLoop<E, T> {
    pub fn new(events: E, target: T, period: Duration) -> Self {
        Self {
            events,
            target,
            ticker: Ticker::new(period),
            state: LoopState::Running,
            frames: 0,
        }
    }

    /// One tick of the loop. Returns the state after the tick.
    pub fn tick(&mut self) -> Result<LoopState> {
        if self.state == LoopState::Exiting || self.events.close_requested() {
            self.state = LoopState::Exiting;
            return Ok(self.state);
        }

        self.events.poll_events();

        let index = match self.target.acquire_next_image()? {
            AcquiredImage::Ready(index) => index,
            AcquiredImage::Outdated => {
                log::debug!("Swapchain outdated, retrying acquire");
                match self.target.acquire_next_image()? {
                    AcquiredImage::Ready(index) => index,
                    AcquiredImage::Outdated => return Err(FrameError::SwapchainOutdated.into()),
                }
            }
        };

        self.target.present_image(index)?;
        self.frames += 1;
        log::trace!("Presented image {} (frame {})", index, self.frames);

        Ok(self.state)
    }

    /// Tick until a close request or an error, then tear everything down.
    ///
    /// Teardown runs on both paths, in order: application resources,
    /// graphics context, window, windowing library.
    pub fn run(mut self) -> Result<u64> {
        log::info!(
            "Entering frame loop at {:.1} Hz",
            1.0 / self.ticker.period().as_secs_f64()
        );

        let result = loop {
            self.ticker.wait();
            match self.tick() {
                Ok(LoopState::Running) => {}
                Ok(LoopState::Exiting) => break Ok(self.frames),
                Err(e) => break Err(e),
            }
        };

        match &result {
            Ok(frames) => log::info!("Close requested after {} frames, shutting down...", frames),
            Err(e) => log::error!("Frame loop failed: {:#}", e),
        }
        self.shutdown();
        result
    }

    fn shutdown(self) {
        self.target.shutdown();
        self.events.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::rc::Rc;

    type Journal = Rc<RefCell<Vec<String>>>;

    struct MockWindow {
        journal: Journal,
        close_after_polls: Option<usize>,
        polls: Cell<usize>,
    }

    impl EventSource for MockWindow {
        fn close_requested(&self) -> bool {
            self.close_after_polls.is_some_and(|n| self.polls.get() >= n)
        }

        fn poll_events(&mut self) {
            self.polls.set(self.polls.get() + 1);
            self.journal.borrow_mut().push("poll".into());
        }

        fn shutdown(self) {
            let mut journal = self.journal.borrow_mut();
            journal.push("window".into());
            journal.push("windowing library".into());
        }
    }

    struct MockTarget {
        journal: Journal,
        acquires: VecDeque<AcquiredImage>,
    }

    impl FrameTarget for MockTarget {
        fn acquire_next_image(&mut self) -> Result<AcquiredImage> {
            let next = self.acquires.pop_front().unwrap_or(AcquiredImage::Ready(0));
            self.journal.borrow_mut().push(format!("acquire {:?}", next));
            Ok(next)
        }

        fn present_image(&mut self, index: u32) -> Result<()> {
            self.journal.borrow_mut().push(format!("present {}", index));
            Ok(())
        }

        fn shutdown(self) {
            let mut journal = self.journal.borrow_mut();
            journal.push("application".into());
            journal.push("context".into());
        }
    }

    fn frame_loop(
        close_after_polls: Option<usize>,
        acquires: Vec<AcquiredImage>,
    ) -> (FrameLoop<MockWindow, MockTarget>, Journal) {
        let journal = Journal::default();
        let window = MockWindow {
            journal: journal.clone(),
            close_after_polls,
            polls: Cell::new(0),
        };
        let target = MockTarget {
            journal: journal.clone(),
            acquires: acquires.into(),
        };
        let period = Duration::from_millis(1);
        (FrameLoop::new(window, target, period), journal)
    }

    fn entries(journal: &Journal) -> Vec<String> {
        journal.borrow().clone()
    }

    #[test]
    fn tick_polls_acquires_and_presents() {
        let (mut frame_loop, journal) = frame_loop(None, vec![AcquiredImage::Ready(2)]);

        assert_eq!(frame_loop.tick().unwrap(), LoopState::Running);
        assert_eq!(entries(&journal), ["poll", "acquire Ready(2)", "present 2"]);
    }

    #[test]
    fn outdated_acquire_is_retried_once() {
        let (mut frame_loop, journal) =
            frame_loop(None, vec![AcquiredImage::Outdated, AcquiredImage::Ready(1)]);

        assert_eq!(frame_loop.tick().unwrap(), LoopState::Running);
        assert_eq!(
            entries(&journal),
            ["poll", "acquire Outdated", "acquire Ready(1)", "present 1"]
        );
    }

    #[test]
    fn second_outdated_fails_the_tick() {
        let (mut frame_loop, journal) =
            frame_loop(None, vec![AcquiredImage::Outdated, AcquiredImage::Outdated]);

        let err = frame_loop.tick().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FrameError>(),
            Some(FrameError::SwapchainOutdated)
        ));
        assert!(!entries(&journal).iter().any(|e| e.starts_with("present")));
    }

    #[test]
    fn close_request_exits_without_touching_the_swapchain() {
        let (mut frame_loop, journal) = frame_loop(Some(0), vec![]);

        assert_eq!(frame_loop.tick().unwrap(), LoopState::Exiting);
        // Exiting is terminal
        assert_eq!(frame_loop.tick().unwrap(), LoopState::Exiting);
        assert!(entries(&journal).is_empty());
    }

    #[test]
    fn run_tears_down_in_fixed_order_on_close() {
        let (frame_loop, journal) = frame_loop(Some(2), vec![]);

        let frames = frame_loop.run().unwrap();
        assert_eq!(frames, 2);

        let log = entries(&journal);
        let tail: Vec<&str> = log[log.len() - 4..].iter().map(String::as_str).collect();
        assert_eq!(tail, ["application", "context", "window", "windowing library"]);
    }

    #[test]
    fn run_ends_on_the_tick_that_sees_the_close_request() {
        let (frame_loop, journal) = frame_loop(Some(1), vec![]);
        frame_loop.run().unwrap();

        // One full frame, then the close is observed before any more polling
        assert_eq!(
            entries(&journal),
            [
                "poll",
                "acquire Ready(0)",
                "present 0",
                "application",
                "context",
                "window",
                "windowing library"
            ]
        );
    }

    #[test]
    fn run_still_tears_down_after_an_error() {
        let (frame_loop, journal) =
            frame_loop(None, vec![AcquiredImage::Outdated, AcquiredImage::Outdated]);

        assert!(frame_loop.run().is_err());
        let log = entries(&journal);
        assert_eq!(
            &log[log.len() - 4..],
            ["application", "context", "window", "windowing library"]
        );
    }

    #[test]
    fn ticker_never_fires_early() {
        let period = Duration::from_millis(5);
        let start = Instant::now();
        let mut ticker = Ticker::new(period);

        for _ in 0..3 {
            ticker.wait();
        }
        assert!(start.elapsed() >= period * 3);
    }

    #[test]
    fn ticker_restarts_schedule_after_falling_behind() {
        let period = Duration::from_millis(5);
        let mut ticker = Ticker::new(period);
        thread::sleep(period * 4);

        // Missed deadlines are dropped, so the tick after the late one waits again
        ticker.wait();
        let before = Instant::now();
        ticker.wait();
        assert!(before.elapsed() >= period / 2);
    }

    #[test]
    fn sixty_hertz_period() {
        let ticker = Ticker::new(Duration::from_secs(1) / 60);
        assert_eq!(ticker.period(), Duration::from_nanos(16_666_666));
    }
}
