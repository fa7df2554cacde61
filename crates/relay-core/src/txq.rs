//! Transmit queue
//!
//! Each channel has two FIFO lists. Digipeated traffic goes on the high
//! priority list so it leaves before anything else and collides less with
//! other digipeaters repeating the same packet. Everything else goes on the
//! low priority list.
//!
//! Any number of threads may append. One transmitter thread per channel
//! waits on that channel's condition variable and drains high before low.
//! All channels share one mutex; packet radio rates are a few frames per
//! second so contention is negligible.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use relay_packet::Packet;
use tracing::{debug, error, warn};

use crate::config::Medium;
use crate::error::RelayError;

/// APRS packets are discarded once a priority list holds more than this
pub const APRS_QUEUE_LIMIT: usize = 100;

/// Connected mode traffic only warns above this
pub const DATA_QUEUE_WARN: usize = 250;

/// Transmit priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Priority {
    /// Digipeated frames
    High,
    /// Everything else
    Low,
}

impl Priority {
    /// Both priorities, drain order
    pub const ALL: [Priority; 2] = [Priority::High, Priority::Low];

    fn index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Low => 1,
        }
    }
}

/// One queued item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEntry {
    /// Frame to send
    Frame(Packet),
    /// Request to key up the transmitter without a frame, used by the
    /// connected mode link layer
    Seize,
}

impl TxEntry {
    /// The frame, if this entry carries one
    pub fn packet(&self) -> Option<&Packet> {
        match self {
            TxEntry::Frame(p) => Some(p),
            TxEntry::Seize => None,
        }
    }

    /// Consume into the frame, if any
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            TxEntry::Frame(p) => Some(p),
            TxEntry::Seize => None,
        }
    }
}

type ChannelLists = [VecDeque<TxEntry>; 2];

/// Per channel transmit queues
pub struct TxQueue {
    media: Vec<Medium>,
    lists: Mutex<Vec<ChannelLists>>,
    wake: Vec<Condvar>,
}

impl TxQueue {
    /// One pair of lists per channel
    pub fn new(media: Vec<Medium>) -> Self {
        let lists = media.iter().map(|_| Default::default()).collect();
        let wake = media.iter().map(|_| Condvar::new()).collect();
        Self {
            media,
            lists: Mutex::new(lists),
            wake,
        }
    }

    /// Number of channel slots
    pub fn channels(&self) -> usize {
        self.media.len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<ChannelLists>> {
        self.lists.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_channel(&self, chan: usize) -> Result<(), RelayError> {
        match self.media.get(chan) {
            None => Err(RelayError::InvalidChannel(chan)),
            Some(Medium::None) => Err(RelayError::NoMedium(chan)),
            Some(_) => Ok(()),
        }
    }

    fn check_radio(&self, chan: usize) -> Result<(), RelayError> {
        match self.media.get(chan) {
            Some(Medium::Radio) => Ok(()),
            Some(_) => Err(RelayError::NotRadio { chan }),
            None => Err(RelayError::InvalidChannel(chan)),
        }
    }

    fn push(&self, chan: usize, prio: Priority, entry: TxEntry) {
        let mut lists = self.lock();
        lists[chan][prio.index()].push_back(entry);
        drop(lists);
        self.wake[chan].notify_one();
    }

    /// Queue an APRS or other UI frame.
    ///
    /// An APRS frame is discarded when its list already holds more than
    /// [`APRS_QUEUE_LIMIT`] entries; that usually means the channel is
    /// stuck busy.
    pub fn append(&self, chan: usize, prio: Priority, packet: Packet) -> Result<(), RelayError> {
        if let Err(e) = self.check_channel(chan) {
            error!("Request to transmit on invalid channel {}: {}", chan, e);
            return Err(e);
        }

        if packet.is_aprs() {
            let len = self.count(chan, Some(prio), None, None, false);
            if len > APRS_QUEUE_LIMIT {
                warn!(
                    "Transmit packet queue for channel {} is too long. Discarding packet.",
                    chan
                );
                return Err(RelayError::QueueFull { chan, len });
            }
        }

        debug!("tx queue {} {:?}: {}", chan, prio, packet);
        self.push(chan, prio, TxEntry::Frame(packet));
        Ok(())
    }

    /// Queue a connected mode frame. Long queues are reported but nothing is
    /// dropped.
    pub fn lm_data_request(
        &self,
        chan: usize,
        prio: Priority,
        packet: Packet,
    ) -> Result<(), RelayError> {
        if let Err(e) = self.check_radio(chan) {
            error!("Request to transmit on invalid radio channel {}: {}", chan, e);
            return Err(e);
        }

        let len = self.count(chan, Some(prio), None, None, false);
        if len > DATA_QUEUE_WARN {
            warn!(
                "Transmit packet queue for channel {} is extremely long ({} packets).",
                chan, len
            );
        }

        self.push(chan, prio, TxEntry::Frame(packet));
        Ok(())
    }

    /// Ask the transmitter to key up so the link layer learns when the
    /// channel is ours
    pub fn lm_seize_request(&self, chan: usize) -> Result<(), RelayError> {
        if let Err(e) = self.check_radio(chan) {
            error!("Seize request on invalid radio channel {}: {}", chan, e);
            return Err(e);
        }
        self.push(chan, Priority::Low, TxEntry::Seize);
        Ok(())
    }

    /// Take the head of one list
    pub fn remove(&self, chan: usize, prio: Priority) -> Option<TxEntry> {
        let mut lists = self.lock();
        lists.get_mut(chan)?[prio.index()].pop_front()
    }

    /// Take the next entry, high priority first
    pub fn remove_next(&self, chan: usize) -> Option<TxEntry> {
        let mut lists = self.lock();
        let chan_lists = lists.get_mut(chan)?;
        Priority::ALL
            .iter()
            .find_map(|p| chan_lists[p.index()].pop_front())
    }

    /// Copy of the head of one list
    pub fn peek(&self, chan: usize, prio: Priority) -> Option<TxEntry> {
        let lists = self.lock();
        lists.get(chan)?[prio.index()].front().cloned()
    }

    /// Both lists of `chan` are empty
    pub fn is_empty(&self, chan: usize) -> bool {
        let lists = self.lock();
        lists
            .get(chan)
            .map_or(true, |l| l.iter().all(VecDeque::is_empty))
    }

    /// Count queued frames, or their bytes.
    ///
    /// `prio` of `None` counts both lists. `source` and `dest` restrict the
    /// count to frames with that exact address (SSID included).
    pub fn count(
        &self,
        chan: usize,
        prio: Option<Priority>,
        source: Option<&str>,
        dest: Option<&str>,
        bytes: bool,
    ) -> usize {
        let lists = self.lock();
        let Some(chan_lists) = lists.get(chan) else {
            error!("tx queue count for invalid channel {}", chan);
            return 0;
        };

        let prios: &[Priority] = match prio {
            Some(Priority::High) => &[Priority::High],
            Some(Priority::Low) => &[Priority::Low],
            None => &Priority::ALL,
        };

        prios
            .iter()
            .flat_map(|p| chan_lists[p.index()].iter())
            .filter_map(TxEntry::packet)
            .filter(|p| source.map_or(true, |s| p.source().with_ssid() == s))
            .filter(|p| dest.map_or(true, |d| p.destination().with_ssid() == d))
            .map(|p| if bytes { p.frame_len() } else { 1 })
            .sum()
    }

    /// Block until `chan` has something queued
    pub fn wait_while_empty(&self, chan: usize) {
        let Some(cv) = self.wake.get(chan) else {
            error!("wait on invalid transmit channel {}", chan);
            return;
        };
        let mut lists = self.lock();
        while lists[chan].iter().all(VecDeque::is_empty) {
            lists = cv.wait(lists).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Block until `chan` has something queued or `timeout` passes.
    ///
    /// Returns `true` on timeout.
    pub fn wait_while_empty_timeout(&self, chan: usize, timeout: Duration) -> bool {
        let Some(cv) = self.wake.get(chan) else {
            error!("wait on invalid transmit channel {}", chan);
            return true;
        };
        let lists = self.lock();
        let (_lists, result) = cv
            .wait_timeout_while(lists, timeout, |l| l[chan].iter().all(VecDeque::is_empty))
            .unwrap_or_else(PoisonError::into_inner);
        result.timed_out()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_packet::Address;

    fn queue() -> TxQueue {
        TxQueue::new(vec![Medium::Radio, Medium::None, Medium::NetTnc])
    }

    fn pkt(s: &str) -> Packet {
        Packet::from_text(s, true).unwrap()
    }

    fn text(entry: Option<TxEntry>) -> String {
        entry
            .and_then(TxEntry::into_packet)
            .map(|p| p.to_text())
            .unwrap_or_default()
    }

    #[test]
    fn test_high_before_low() {
        let q = queue();
        q.append(0, Priority::Low, pkt("A>B:low1")).unwrap();
        q.append(0, Priority::High, pkt("A>B:high1")).unwrap();
        q.append(0, Priority::Low, pkt("A>B:low2")).unwrap();
        q.append(0, Priority::High, pkt("A>B:high2")).unwrap();

        assert_eq!(text(q.remove_next(0)), "A>B:high1");
        assert_eq!(text(q.remove_next(0)), "A>B:high2");
        assert_eq!(text(q.remove_next(0)), "A>B:low1");
        assert_eq!(text(q.remove_next(0)), "A>B:low2");
        assert!(q.remove_next(0).is_none());
    }

    #[test]
    fn test_invalid_channels() {
        let q = queue();
        assert!(matches!(
            q.append(1, Priority::Low, pkt("A>B:x")),
            Err(RelayError::NoMedium(1))
        ));
        assert!(matches!(
            q.append(9, Priority::Low, pkt("A>B:x")),
            Err(RelayError::InvalidChannel(9))
        ));
        assert!(q.append(2, Priority::Low, pkt("A>B:x")).is_ok());
    }

    #[test]
    fn test_aprs_overflow_drops() {
        let q = queue();
        for i in 0..=APRS_QUEUE_LIMIT {
            q.append(0, Priority::Low, pkt(&format!("A>B:{}", i))).unwrap();
        }
        assert!(matches!(
            q.append(0, Priority::Low, pkt("A>B:overflow")),
            Err(RelayError::QueueFull { chan: 0, .. })
        ));
        assert!(q.append(0, Priority::High, pkt("A>B:other list")).is_ok());
    }

    #[test]
    fn test_data_request_never_drops() {
        let q = queue();
        let frame = Packet::new_frame(
            Address::new("W1ABC", 0),
            Address::new("W2DEF", 0),
            vec![],
            0x00,
            Some(0xf0),
            b"data".to_vec(),
        )
        .unwrap();
        for _ in 0..(DATA_QUEUE_WARN + 5) {
            q.lm_data_request(0, Priority::Low, frame.clone()).unwrap();
        }
        assert_eq!(q.count(0, Some(Priority::Low), None, None, false), DATA_QUEUE_WARN + 5);
        assert!(matches!(
            q.lm_data_request(2, Priority::Low, frame),
            Err(RelayError::NotRadio { chan: 2 })
        ));
    }

    #[test]
    fn test_seize_not_counted() {
        let q = queue();
        q.lm_seize_request(0).unwrap();
        assert!(!q.is_empty(0));
        assert_eq!(q.count(0, None, None, None, false), 0);
        assert_eq!(q.remove(0, Priority::Low), Some(TxEntry::Seize));
    }

    #[test]
    fn test_count_filters() {
        let q = queue();
        q.append(0, Priority::High, pkt("W1ABC>APRS:abc")).unwrap();
        q.append(0, Priority::Low, pkt("W1ABC-1>APRS:abcd")).unwrap();
        q.append(0, Priority::Low, pkt("W1ABC>TEST:ab")).unwrap();

        assert_eq!(q.count(0, None, None, None, false), 3);
        assert_eq!(q.count(0, Some(Priority::Low), None, None, false), 2);
        assert_eq!(q.count(0, None, Some("W1ABC"), None, false), 2);
        assert_eq!(q.count(0, None, Some("W1ABC"), Some("APRS"), false), 1);
        assert_eq!(q.count(0, Some(Priority::High), None, None, true), 7 * 2 + 2 + 3);
        assert_eq!(q.count(5, None, None, None, false), 0);
    }

    #[test]
    fn test_peek_leaves_entry() {
        let q = queue();
        q.append(0, Priority::Low, pkt("A>B:x")).unwrap();
        assert_eq!(text(q.peek(0, Priority::Low)), "A>B:x");
        assert_eq!(text(q.remove(0, Priority::Low)), "A>B:x");
        assert!(q.peek(0, Priority::Low).is_none());
    }

    #[test]
    fn test_wait_timeout_and_wake() {
        use std::sync::Arc;
        use std::thread;

        let q = Arc::new(queue());
        assert!(q.wait_while_empty_timeout(0, Duration::from_millis(10)));

        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.append(0, Priority::Low, pkt("A>B:wake")).unwrap();
            })
        };
        q.wait_while_empty(0);
        assert_eq!(text(q.remove_next(0)), "A>B:wake");
        producer.join().unwrap();
    }
}
