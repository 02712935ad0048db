use crossbeam_channel::Sender;

use crate::results::FileResult;

/// Messages the engine delivers to its host.
///
/// `Start` and `End` bracket every run, including cancelled ones. `Progress`
/// arrives once per processed file; `Found` only for files that qualify
/// under the request's reporting mode. For a given file, `Found` (if any)
/// precedes `Progress`, and both come from the same worker thread.
#[derive(Debug, Clone)]
pub enum SearchEvent {
    Start,
    Progress { matched: bool },
    Found(FileResult),
    End,
}

/// Thin wrapper over the host channel. Send failures mean the host hung up;
/// the run keeps going so replace operations finish cleanly.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: Sender<SearchEvent>,
}

impl EventBus {
    pub fn new(tx: Sender<SearchEvent>) -> Self {
        Self { tx }
    }

    pub(crate) fn start(&self) {
        let _ = self.tx.send(SearchEvent::Start);
    }

    pub(crate) fn found(&self, result: FileResult) {
        let _ = self.tx.send(SearchEvent::Found(result));
    }

    pub(crate) fn progress(&self, matched: bool) {
        let _ = self.tx.send(SearchEvent::Progress { matched });
    }

    pub(crate) fn end(&self) {
        let _ = self.tx.send(SearchEvent::End);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn events_arrive_in_send_order() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let bus = EventBus::new(tx);
        bus.start();
        bus.found(FileResult::new(PathBuf::from("a")));
        bus.progress(true);
        bus.end();

        assert!(matches!(rx.recv().unwrap(), SearchEvent::Start));
        assert!(matches!(rx.recv().unwrap(), SearchEvent::Found(_)));
        assert!(matches!(
            rx.recv().unwrap(),
            SearchEvent::Progress { matched: true }
        ));
        assert!(matches!(rx.recv().unwrap(), SearchEvent::End));
    }

    #[test]
    fn send_after_hangup_is_ignored() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let bus = EventBus::new(tx);
        drop(rx);
        bus.progress(false); // must not panic
    }
}
