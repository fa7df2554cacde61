//! Integration tests for the digipeater engines and queues
//!
//! These tests cover:
//! - The WIDEn-N, alias, preemptive and hop-limited path rules
//! - Duplicate suppression over time
//! - Loop avoidance for our own transmissions
//! - Channel fan-out and transmit priority
//! - Filters and regeneration
//! - Path invariants under random input

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use relay_core::{
    AcceptAll, ChannelConfig, Channels, DigiConfig, DigiObserver, DigiRuleConfig, Digipeater,
    ExprFilter, Medium, PacketFilter, Preempt, Priority, TxEntry, TxQueue,
};
use relay_packet::{Packet, MAX_REPEATERS};

// ============================================================================
// Test Helpers
// ============================================================================

mod helpers {
    use super::*;

    pub const ALIAS: &str = "^WIDE[4-7]-[1-7]|CITYD$";
    pub const WIDE: &str = "^WIDE[1-7]-[1-7]$|^TRACE[1-7]-[1-7]$|^MA[1-7]-[1-7]$|^HOP[1-7]-[1-7]$";

    /// Single channel digipeater with a controllable clock
    pub struct Harness {
        pub digi: Digipeater,
        pub txq: Arc<TxQueue>,
        pub now: Instant,
    }

    impl Harness {
        pub fn new(mycall: &str, preempt: Preempt) -> Self {
            let channels = Channels::new(&[ChannelConfig::radio(mycall)]);
            let mut rule = DigiRuleConfig::new(0, 0, ALIAS, WIDE);
            rule.preempt = preempt;
            rule.atgp = "HOP".into();
            let config = DigiConfig {
                dedupe_time_secs: 4,
                rules: vec![rule],
            };
            let txq = Arc::new(TxQueue::new(channels.media()));
            let digi = Digipeater::new(channels, &config, Arc::new(AcceptAll), Arc::clone(&txq));
            Self {
                digi,
                txq,
                now: Instant::now(),
            }
        }

        pub fn advance(&mut self, secs: u64) {
            self.now += Duration::from_secs(secs);
        }

        /// Feed one received frame; return what was queued, or "" for nothing
        pub fn check(&mut self, input: &str, expected: &str) {
            let p = Packet::from_text(input, true).unwrap();
            assert_eq!(p.to_text(), input, "monitor text must round trip");

            self.digi.digipeat_at(0, &p, self.now);
            let out = self
                .txq
                .remove_next(0)
                .and_then(TxEntry::into_packet)
                .map(|r| r.to_text())
                .unwrap_or_default();
            assert_eq!(out, expected, "input: {}", input);
            assert!(self.txq.is_empty(0));
        }
    }

    pub fn pkt(text: &str) -> Packet {
        Packet::from_text(text, true).unwrap()
    }

    pub fn drain(txq: &TxQueue, chan: usize, prio: Priority) -> Vec<String> {
        std::iter::from_fn(|| txq.remove(chan, prio))
            .filter_map(TxEntry::into_packet)
            .map(|p| p.to_text())
            .collect()
    }

    #[derive(Default)]
    pub struct Recorder {
        pub seen: Mutex<Vec<(String, usize)>>,
    }

    impl DigiObserver for Recorder {
        fn digipeated(&self, packet: &Packet, to_chan: usize) {
            self.seen.lock().unwrap().push((packet.to_text(), to_chan));
        }
    }
}

use helpers::*;

// ============================================================================
// Path Rule Tests
// ============================================================================

mod path_rule_tests {
    use super::*;

    #[test]
    fn basic_wide_and_trace() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("W1ABC>TEST01,TRACE3-3:", "W1ABC>TEST01,WB2OSZ-9*,TRACE3-2:");
        h.check("W1ABC>TEST02,WIDE3-3:", "W1ABC>TEST02,WB2OSZ-9*,WIDE3-2:");
        h.check("W1ABC>TEST03,WIDE3-2:", "W1ABC>TEST03,WB2OSZ-9*,WIDE3-1:");
        h.check("W1ABC>TEST04,WIDE3-1:", "W1ABC>TEST04,WB2OSZ-9*:");
    }

    #[test]
    fn full_path_is_not_extended() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check(
            "W1ABC>TEST11,R1,R2,R3,R4,R5,R6*,WIDE3-3:",
            "W1ABC>TEST11,R1,R2,R3,R4,R5,R6,WB2OSZ-9*,WIDE3-2:",
        );
        h.check(
            "W1ABC>TEST12,R1,R2,R3,R4,R5,R6,R7*,WIDE3-3:",
            "W1ABC>TEST12,R1,R2,R3,R4,R5,R6,R7*,WIDE3-2:",
        );
        h.check(
            "W1ABC>TEST13,R1,R2,R3,R4,R5,R6,R7*,WIDE3-1:",
            "W1ABC>TEST13,R1,R2,R3,R4,R5,R6,R7,WB2OSZ-9*:",
        );
    }

    #[test]
    fn large_n_is_trapped() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("W1ABC>TEST21,WIDE4-4:", "W1ABC>TEST21,WB2OSZ-9*:");
        h.check("W1ABC>TEST22,WIDE7-7:", "W1ABC>TEST22,WB2OSZ-9*:");
    }

    #[test]
    fn out_of_range_never_matches() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("W1ABC>TEST31,WIDE0-4:", "");
        h.check("W1ABC>TEST32,WIDE8-4:", "");
        h.check("W1ABC>TEST33,WIDE2:", "");
    }

    #[test]
    fn heard_on_the_air() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("WA1ENO>FN42ND,W1MV-1*,WIDE3-2:", "WA1ENO>FN42ND,W1MV-1,WB2OSZ-9*,WIDE3-1:");
        h.check("W1ON-3>BEACON:", "");
        h.check("W1CMD-9>TQ3Y8P,N1RCW-2,W1CLA-1,N8VIM,WIDE2*:", "");
        h.check("W1CLA-1>APX192,W1GLO-1,WIDE2*:", "");
        h.check(
            "AC1U-9>T2TX4S,AC1U,WIDE1,N8VIM*,WIDE2-1:",
            "AC1U-9>T2TX4S,AC1U,WIDE1,N8VIM,WB2OSZ-9*:",
        );
        h.check("K1CPD-1>T2SR5R,RELAY*,WIDE,WIDE,SGATE,WIDE:", "");
    }

    #[test]
    fn destination_ssid_is_not_a_path() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("W1ABC>TEST-3:", "");
        h.check("W1DEF>TEST-3,WIDE2-2:", "W1DEF>TEST-3,WB2OSZ-9*,WIDE2-1:");
    }

    #[test]
    fn own_source_is_not_repeated() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Trace);
        h.check("WB2OSZ-7>TEST14,WIDE1-1,WIDE1-1:stuff", "WB2OSZ-7>TEST14,WB2OSZ-9*,WIDE1-1:stuff");
        h.check("WB2OSZ-9>TEST14,WIDE1-1,WIDE1-1:from myself", "");
        h.check(
            "WB2OSZ-9>TEST14,WIDE1-1*,WB2OSZ-9:from myself but explicit routing",
            "WB2OSZ-9>TEST14,WIDE1-1,WB2OSZ-9*:from myself but explicit routing",
        );
        h.check("WB2OSZ-15>TEST14,WIDE1-1,WIDE1-1:stuff", "WB2OSZ-15>TEST14,WB2OSZ-9*,WIDE1-1:stuff");
    }

    #[test]
    fn hop_limited_path() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("W1ABC>TEST51,HOP7-7,HOP7-7:stuff1", "W1ABC>TEST51,WB2OSZ-9*,HOP7-6,HOP7-7:stuff1");
        h.check("W1ABC>TEST52,ABCD*,HOP7-1,HOP7-7:stuff2", "W1ABC>TEST52,WB2OSZ-9,HOP7*,HOP7-7:stuff2");
        h.check("W1ABC>TEST53,HOP7*,HOP7-7:stuff3", "W1ABC>TEST53,WB2OSZ-9*,HOP7-6:stuff3");
        h.check("W1ABC>TEST54,HOP7*,HOP7-1:stuff4", "W1ABC>TEST54,WB2OSZ-9,HOP7*:stuff4");
        h.check("W1ABC>TEST55,HOP7,HOP7*:stuff5", "");

        let mut h = Harness::new("CLNGMN-1", Preempt::Off);
        h.check("W1ABC>TEST60,HOP7-7,HOP7-7:", "W1ABC>TEST60,CLNGMN-1*,HOP7-6,HOP7-7:");
    }

    #[test]
    fn hop_limited_full_path_still_digipeated() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check(
            "W1ABC>TEST61,HOP7-7,N0CALA,N0CALB,N0CALC,N0CALD,N0CALE,N0CALF,N0CALG:full",
            "W1ABC>TEST61,HOP7-6*,N0CALA,N0CALB,N0CALC,N0CALD,N0CALE,N0CALF,N0CALG:full",
        );
    }
}

// ============================================================================
// Preemptive Digipeating Tests
// ============================================================================

mod preempt_tests {
    use super::*;

    #[test]
    fn off_only_looks_at_first_unused() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("W1ABC>TEST11,CITYA*,CITYB,CITYC,CITYD,CITYE:off", "");
    }

    #[test]
    fn drop_removes_everything_before() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Drop);
        h.check("W1ABC>TEST11,CITYA*,CITYB,CITYC,CITYD,CITYE:drop", "W1ABC>TEST11,WB2OSZ-9*,CITYE:drop");
    }

    #[test]
    fn mark_keeps_and_marks() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Mark);
        h.check(
            "W1ABC>TEST11,CITYA*,CITYB,CITYC,CITYD,CITYE:mark1",
            "W1ABC>TEST11,CITYA,CITYB,CITYC,WB2OSZ-9*,CITYE:mark1",
        );
        h.check(
            "W1ABC>TEST11,CITYA*,CITYB,CITYC,WB2OSZ-9,CITYE:mark2",
            "W1ABC>TEST11,CITYA,CITYB,CITYC,WB2OSZ-9*,CITYE:mark2",
        );
    }

    #[test]
    fn trace_removes_unused_before() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Trace);
        h.check(
            "W1ABC>TEST11,CITYA*,CITYB,CITYC,CITYD,CITYE:trace1",
            "W1ABC>TEST11,CITYA,WB2OSZ-9*,CITYE:trace1",
        );
        h.check("W1ABC>TEST11,CITYA*,CITYB,CITYC,CITYD:trace2", "W1ABC>TEST11,CITYA,WB2OSZ-9*:trace2");
        h.check("W1ABC>TEST11,CITYB,CITYC,CITYD:trace3", "W1ABC>TEST11,WB2OSZ-9*:trace3");
        h.check("W1ABC>TEST11,CITYA*,CITYW,CITYX,CITYY,CITYZ:nomatch", "");
    }
}

// ============================================================================
// Duplicate Suppression Tests
// ============================================================================

mod dedupe_tests {
    use super::*;

    #[test]
    fn only_first_copy_within_window() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("W1XYZ>TESTD,R1*,WIDE3-2:info1", "W1XYZ>TESTD,R1,WB2OSZ-9*,WIDE3-1:info1");
        h.advance(1);
        h.check("W1XYZ>TESTD,R2*,WIDE3-2:info1", "");
        h.advance(1);
        h.check("W1XYZ>TESTD,R3*,WIDE3-2:info1", "");
        h.check(
            "W1XYZ>TESTD,R1*,WB2OSZ-9:has explicit routing",
            "W1XYZ>TESTD,R1,WB2OSZ-9*:has explicit routing",
        );
    }

    #[test]
    fn accepted_again_after_window() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("W1XYZ>TESTD,R1*,WIDE3-2:info1", "W1XYZ>TESTD,R1,WB2OSZ-9*,WIDE3-1:info1");
        h.advance(5);
        h.check("W1XYZ>TESTD,R3*,WIDE3-2:info1", "W1XYZ>TESTD,R3,WB2OSZ-9*,WIDE3-1:info1");
    }

    #[test]
    fn different_info_is_not_duplicate() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("W1XYZ>TEST,R1*,WIDE3-2:info4", "W1XYZ>TEST,R1,WB2OSZ-9*,WIDE3-1:info4");
        h.check("W1XYZ>TEST,R1*,WIDE3-2:info5", "W1XYZ>TEST,R1,WB2OSZ-9*,WIDE3-1:info5");
        h.check("W1XYZ>TEST,R1*,WIDE3-2:info6", "W1XYZ>TEST,R1,WB2OSZ-9*,WIDE3-1:info6");
    }

    #[test]
    fn trailing_whitespace_ignored() {
        let mut h = Harness::new("WB2OSZ-9", Preempt::Off);
        h.check("W1XYZ>TEST,WIDE2-2:same", "W1XYZ>TEST,WB2OSZ-9*,WIDE2-1:same");
        h.check("W1XYZ>TEST,WIDE1-1:same  ", "");
    }
}

// ============================================================================
// Channel Fan-out Tests
// ============================================================================

mod fanout_tests {
    use super::*;

    fn two_channel(regen: bool) -> (Digipeater, Arc<TxQueue>) {
        let channels = Channels::new(&[ChannelConfig::radio("WB2OSZ-1"), ChannelConfig::radio("WB2OSZ-2")]);
        let mut cross = DigiRuleConfig::new(0, 1, "", "^WIDE[1-7]-[1-7]$");
        cross.regen = regen;
        let config = DigiConfig {
            dedupe_time_secs: 30,
            rules: vec![cross, DigiRuleConfig::new(0, 0, "", "^WIDE[1-7]-[1-7]$")],
        };
        let txq = Arc::new(TxQueue::new(channels.media()));
        let digi = Digipeater::new(channels, &config, Arc::new(AcceptAll), Arc::clone(&txq));
        (digi, txq)
    }

    #[test]
    fn same_channel_high_cross_channel_low() {
        let (mut digi, txq) = two_channel(false);
        let heard = pkt("W1ABC>APRS,WIDE2-2:hello");
        digi.digipeat(0, &heard);

        assert_eq!(drain(&txq, 0, Priority::High), vec!["W1ABC>APRS,WB2OSZ-1*,WIDE2-1:hello"]);
        assert!(drain(&txq, 0, Priority::Low).is_empty());
        assert_eq!(drain(&txq, 1, Priority::Low), vec!["W1ABC>APRS,WB2OSZ-2*,WIDE2-1:hello"]);
        assert_eq!(digi.count(0, 0), 1);
        assert_eq!(digi.count(0, 1), 1);
        assert_eq!(heard.to_text(), "W1ABC>APRS,WIDE2-2:hello");
    }

    #[test]
    fn dedupe_is_per_destination_channel() {
        let (mut digi, txq) = two_channel(false);
        let now = Instant::now();
        digi.remember_at(&pkt("W1ABC>APRS:hello"), 1, now);
        digi.digipeat_at(0, &pkt("W1ABC>APRS,WIDE2-2:hello"), now);

        assert_eq!(drain(&txq, 0, Priority::High).len(), 1);
        assert!(drain(&txq, 1, Priority::Low).is_empty());
    }

    #[test]
    fn observer_sees_received_frame() {
        let (digi, _txq) = two_channel(false);
        let recorder = Arc::new(Recorder::default());
        let mut digi = digi.with_observer(recorder.clone());
        digi.digipeat(0, &pkt("W1ABC>APRS,WIDE1-1:hi"));

        let seen = recorder.seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("W1ABC>APRS,WIDE1-1:hi".to_string(), 0),
                ("W1ABC>APRS,WIDE1-1:hi".to_string(), 1),
            ]
        );
    }

    #[test]
    fn regenerate_copies_unchanged_at_low() {
        let (digi, txq) = two_channel(true);
        digi.regenerate(0, &pkt("W1ABC>APRS,WIDE2-2:hello"));
        assert_eq!(drain(&txq, 1, Priority::Low), vec!["W1ABC>APRS,WIDE2-2:hello"]);
        assert!(txq.is_empty(0));
    }

    #[test]
    fn unconfigured_receive_channel_ignored() {
        let channels = Channels::new(&[
            ChannelConfig::radio("WB2OSZ-1"),
            ChannelConfig {
                medium: Medium::None,
                mycall: "WB2OSZ-3".into(),
            },
        ]);
        let config = DigiConfig {
            dedupe_time_secs: 30,
            rules: vec![DigiRuleConfig::new(1, 0, "", "^WIDE[1-7]-[1-7]$")],
        };
        let txq = Arc::new(TxQueue::new(channels.media()));
        let mut digi = Digipeater::new(channels, &config, Arc::new(AcceptAll), Arc::clone(&txq));
        digi.digipeat(1, &pkt("W1ABC>APRS,WIDE2-2:hello"));
        assert!(txq.is_empty(0));
    }
}

// ============================================================================
// Filter Tests
// ============================================================================

mod filter_tests {
    use super::*;

    fn filtered(expr: &str) -> (Digipeater, Arc<TxQueue>) {
        let channels = Channels::new(&[ChannelConfig::radio("WB2OSZ-9")]);
        let mut rule = DigiRuleConfig::new(0, 0, "", "^WIDE[1-7]-[1-7]$");
        rule.filter = Some(expr.into());
        let config = DigiConfig {
            dedupe_time_secs: 30,
            rules: vec![rule],
        };
        let txq = Arc::new(TxQueue::new(channels.media()));
        let filter: Arc<dyn PacketFilter> = Arc::new(ExprFilter);
        (Digipeater::new(channels, &config, filter, Arc::clone(&txq)), txq)
    }

    #[test]
    fn weather_only() {
        let (mut digi, txq) = filtered("t/w");
        digi.digipeat(0, &pkt("N8VIM>APN391,WIDE2-1:$ULTW00000000010E097D2884FFF389DC000102430002033400000000"));
        digi.digipeat(0, &pkt("AB1OC-10>APWW10,WIDE1-1,WIDE2-1:>FN42er/# Hollis, NH iGate Operational"));
        assert_eq!(
            drain(&txq, 0, Priority::High),
            vec!["N8VIM>APN391,WB2OSZ-9*:$ULTW00000000010E097D2884FFF389DC000102430002033400000000"]
        );
    }

    #[test]
    fn status_only() {
        let (mut digi, txq) = filtered("t/s");
        digi.digipeat(0, &pkt("AB1OC-10>APWW10,WIDE1-1,WIDE2-1:>FN42er/# Hollis, NH iGate Operational"));
        assert_eq!(
            drain(&txq, 0, Priority::High),
            vec!["AB1OC-10>APWW10,WB2OSZ-9*,WIDE2-1:>FN42er/# Hollis, NH iGate Operational"]
        );
    }

    #[test]
    fn empty_expression_blocks_everything() {
        let (mut digi, txq) = filtered("");
        digi.digipeat(0, &pkt("W1ABC>APRS,WIDE1-1:>hello"));
        assert!(txq.is_empty(0));
    }

    #[test]
    fn source_list() {
        let (mut digi, txq) = filtered("b/W1ABC/K1*");
        digi.digipeat(0, &pkt("W1ABC>APRS,WIDE1-1:>one"));
        digi.digipeat(0, &pkt("K1XYZ-7>APRS,WIDE1-1:>two"));
        digi.digipeat(0, &pkt("W2DEF>APRS,WIDE1-1:>three"));
        assert_eq!(drain(&txq, 0, Priority::High).len(), 2);
    }
}

// ============================================================================
// Property-Based Tests
// ============================================================================

mod proptest_tests {
    use super::*;
    use proptest::prelude::*;

    fn engine() -> Digipeater {
        let channels = Channels::new(&[ChannelConfig::radio("WB2OSZ-9")]);
        let config = DigiConfig {
            dedupe_time_secs: 30,
            rules: vec![DigiRuleConfig::new(0, 0, "", "^WIDE[1-7]-[1-7]$")],
        };
        let txq = Arc::new(TxQueue::new(channels.media()));
        Digipeater::new(channels, &config, Arc::new(AcceptAll), txq)
    }

    fn path(used: usize, wide: u8, remaining: u8) -> String {
        let mut text = String::from("W1ABC>APRS");
        for i in 1..=used {
            text.push_str(&format!(",R{}", i));
        }
        if used > 0 {
            text.push('*');
        }
        text.push_str(&format!(",WIDE{}-{}:x", wide, remaining));
        text
    }

    proptest! {
        #[test]
        fn wide_n_counts_down_and_traces(used in 0usize..MAX_REPEATERS, n in 1u8..=7, rem in 1u8..=7) {
            let input = pkt(&path(used, n, rem));
            let out = engine().digipeat_match(0, 0, &input).unwrap();

            prop_assert!(out.num_repeaters() <= MAX_REPEATERS);
            if rem == 1 {
                prop_assert_eq!(out.num_repeaters(), input.num_repeaters());
                prop_assert_eq!(out.repeater(used).unwrap().to_string(), "WB2OSZ-9");
                prop_assert!(out.is_used(used));
            } else if input.num_repeaters() < MAX_REPEATERS {
                prop_assert_eq!(out.num_repeaters(), input.num_repeaters() + 1);
                prop_assert_eq!(out.repeater(used).unwrap().to_string(), "WB2OSZ-9");
                prop_assert_eq!(out.repeater_ssid(used + 1), Some(rem - 1));
                prop_assert!(!out.is_used(used + 1));
            } else {
                prop_assert_eq!(out.num_repeaters(), MAX_REPEATERS);
                prop_assert_eq!(out.repeater_ssid(used), Some(rem - 1));
            }
        }

        #[test]
        fn input_never_modified(used in 0usize..MAX_REPEATERS, n in 0u8..=9, rem in 0u8..=9) {
            let input = pkt(&path(used, n, rem));
            let before = input.clone();
            let _ = engine().digipeat_match(0, 0, &input);
            prop_assert_eq!(input, before);
        }

        #[test]
        fn used_bits_stay_a_prefix(used in 0usize..MAX_REPEATERS, rem in 1u8..=7) {
            let out = engine().digipeat_match(0, 0, &pkt(&path(used, 7, rem))).unwrap();
            let first_unused = out.first_not_repeated().unwrap_or(out.num_repeaters());
            for i in 0..out.num_repeaters() {
                prop_assert_eq!(out.is_used(i), i < first_unused);
            }
        }
    }
}
