pub mod test_helpers {
    use std::sync::{Arc, Mutex, PoisonError};
    use std::time::Duration;

    use crate::render::{
        Bitmap, DecodeBackend, PageSize, PatternBackend, RelativeRect, RenderFault,
    };

    /// One call to [`DecodeBackend::render`]
    #[derive(Clone, Copy, Debug, PartialEq)]
    pub struct RenderCall {
        pub page: usize,
        pub width: u32,
        pub height: u32,
        pub bounds: RelativeRect,
    }

    /// Shared view of the calls a [`RecordingBackend`] received
    #[derive(Clone, Default)]
    pub struct CallLog {
        calls: Arc<Mutex<Vec<RenderCall>>>,
    }

    impl CallLog {
        pub fn calls(&self) -> Vec<RenderCall> {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        pub fn pages(&self) -> Vec<usize> {
            self.calls().iter().map(|call| call.page).collect()
        }

        pub fn len(&self) -> usize {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }

        fn push(&self, call: RenderCall) {
            self.calls
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(call);
        }
    }

    /// Pattern document that records every render call and can be told to
    /// fail on given pages
    pub struct RecordingBackend {
        inner: PatternBackend,
        log: CallLog,
        failing_pages: Vec<usize>,
    }

    impl RecordingBackend {
        pub fn new(page_count: usize, page_size: PageSize) -> Self {
            Self {
                inner: PatternBackend::new(page_count, page_size),
                log: CallLog::default(),
                failing_pages: Vec::new(),
            }
        }

        /// Make every render of `page` fail
        pub fn fail_on(mut self, page: usize) -> Self {
            self.failing_pages.push(page);
            self
        }

        pub fn log(&self) -> CallLog {
            self.log.clone()
        }
    }

    impl DecodeBackend for RecordingBackend {
        fn page_count(&self) -> usize {
            self.inner.page_count()
        }

        fn page_width(&mut self, page: usize) -> Result<f32, RenderFault> {
            self.inner.page_width(page)
        }

        fn page_height(&mut self, page: usize) -> Result<f32, RenderFault> {
            self.inner.page_height(page)
        }

        fn render(
            &mut self,
            page: usize,
            width: u32,
            height: u32,
            bounds: RelativeRect,
        ) -> Result<Bitmap, RenderFault> {
            self.log.push(RenderCall {
                page,
                width,
                height,
                bounds,
            });
            if self.failing_pages.contains(&page) {
                return Err(RenderFault::generic(format!(
                    "simulated failure on page {page}"
                )));
            }
            self.inner.render(page, width, height, bounds)
        }
    }

    /// Backend whose renders block until the test releases them
    pub struct GatedBackend<B> {
        inner: B,
        started: flume::Sender<usize>,
        release: flume::Receiver<()>,
        open: bool,
    }

    /// Test side of a [`GatedBackend`]. Dropping it opens the gate.
    pub struct GateController {
        started: flume::Receiver<usize>,
        release: Option<flume::Sender<()>>,
    }

    /// Wrap `inner` so each render waits for [`GateController::release_one`]
    pub fn gated<B: DecodeBackend>(inner: B) -> (GatedBackend<B>, GateController) {
        let (started_tx, started_rx) = flume::unbounded();
        let (release_tx, release_rx) = flume::unbounded();
        (
            GatedBackend {
                inner,
                started: started_tx,
                release: release_rx,
                open: false,
            },
            GateController {
                started: started_rx,
                release: Some(release_tx),
            },
        )
    }

    impl GateController {
        /// Wait for the next render to start and return its page
        pub fn wait_started(&self, timeout: Duration) -> Option<usize> {
            self.started.recv_timeout(timeout).ok()
        }

        /// Let one blocked render finish
        pub fn release_one(&self) {
            if let Some(release) = &self.release {
                let _ = release.send(());
            }
        }

        /// Stop blocking renders for good
        pub fn open(&mut self) {
            self.release = None;
        }
    }

    impl<B: DecodeBackend> DecodeBackend for GatedBackend<B> {
        fn page_count(&self) -> usize {
            self.inner.page_count()
        }

        fn page_width(&mut self, page: usize) -> Result<f32, RenderFault> {
            self.inner.page_width(page)
        }

        fn page_height(&mut self, page: usize) -> Result<f32, RenderFault> {
            self.inner.page_height(page)
        }

        fn render(
            &mut self,
            page: usize,
            width: u32,
            height: u32,
            bounds: RelativeRect,
        ) -> Result<Bitmap, RenderFault> {
            let _ = self.started.send(page);
            if !self.open && self.release.recv().is_err() {
                self.open = true;
            }
            self.inner.render(page, width, height, bounds)
        }
    }
}
