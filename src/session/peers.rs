//! Remote talk tracking: hardware PTT follows the channel, and each peer
//! that stops talking gets one local roger beep once its hold elapses.
//!
//! The sweep runs only while at least one peer is cooling down: it is armed
//! by the first stop and disarms itself when the tracker empties.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;

use crate::engine::PeerId;

use super::hold::TalkHoldTracker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerAction {
    ActivatePtt,
    DeactivatePtt,
    PlayLocalBeep { peer: PeerId },
}

pub struct PeerTalkMonitor {
    /// Peers currently talking, with whether they share our channel.
    talking: HashMap<PeerId, bool>,
    hold: TalkHoldTracker<PeerId>,
    sweep_interval: Duration,
    next_sweep: Option<Instant>,
}

impl PeerTalkMonitor {
    pub fn new(hold: Duration, sweep_interval: Duration) -> Self {
        Self {
            talking: HashMap::new(),
            hold: TalkHoldTracker::new(hold),
            sweep_interval,
            next_sweep: None,
        }
    }

    pub fn set_hold(&mut self, hold: Duration) {
        self.hold.set_hold(hold);
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_sweep
    }

    pub fn is_sweeping(&self) -> bool {
        self.next_sweep.is_some()
    }

    pub fn pending(&self) -> usize {
        self.hold.len()
    }

    pub fn any_talking_in_channel(&self) -> bool {
        self.talking.values().any(|same_channel| *same_channel)
    }

    pub fn on_peer_talk_changed(
        &mut self,
        peer: PeerId,
        talking: bool,
        same_channel: bool,
        now: Instant,
    ) -> Vec<PeerAction> {
        if talking {
            if self.hold.mark_started(&peer) {
                log::debug!("peers: {peer} resumed, beep cancelled");
            }
            self.talking.insert(peer, same_channel);
            return vec![PeerAction::ActivatePtt];
        }

        self.talking.remove(&peer);
        self.hold.mark_stopped(peer, now);
        if self.next_sweep.is_none() {
            self.next_sweep = Some(now + self.sweep_interval);
        }
        if self.any_talking_in_channel() {
            Vec::new()
        } else {
            vec![PeerAction::DeactivatePtt]
        }
    }

    pub fn on_timer(&mut self, now: Instant) -> Vec<PeerAction> {
        if !self.next_sweep.is_some_and(|at| at <= now) {
            return Vec::new();
        }
        let actions = self
            .hold
            .expired(now)
            .into_iter()
            .map(|peer| PeerAction::PlayLocalBeep { peer })
            .collect();
        self.next_sweep = if self.hold.is_empty() {
            None
        } else {
            Some(now + self.sweep_interval)
        };
        actions
    }

    /// Forget everyone.  Releases hardware PTT if it could be held.
    pub fn reset(&mut self) -> Vec<PeerAction> {
        let was_active = !self.talking.is_empty();
        self.talking.clear();
        self.hold.clear();
        self.next_sweep = None;
        if was_active {
            vec![PeerAction::DeactivatePtt]
        } else {
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HOLD: Duration = Duration::from_millis(500);
    const SWEEP: Duration = Duration::from_millis(100);

    /// Run every sweep up to `until`, collecting `(offset_ms, peer)` beeps.
    fn sweep_until(m: &mut PeerTalkMonitor, t0: Instant, until: Duration) -> Vec<(u128, PeerId)> {
        let mut beeps = Vec::new();
        while let Some(at) = m.next_deadline() {
            if at > t0 + until {
                break;
            }
            for action in m.on_timer(at) {
                if let PeerAction::PlayLocalBeep { peer } = action {
                    beeps.push(((at - t0).as_millis(), peer));
                }
            }
        }
        beeps
    }

    #[test]
    fn two_peers_get_separate_beeps() {
        let t0 = Instant::now();
        let mut m = PeerTalkMonitor::new(HOLD, SWEEP);
        m.on_peer_talk_changed(1, true, true, t0);
        m.on_peer_talk_changed(2, true, true, t0);
        m.on_peer_talk_changed(1, false, true, t0);
        m.on_peer_talk_changed(2, false, true, t0 + Duration::from_millis(200));

        assert_eq!(
            sweep_until(&mut m, t0, Duration::from_secs(2)),
            vec![(500, 1), (700, 2)]
        );
        assert!(!m.is_sweeping());
    }

    #[test]
    fn resume_before_expiry_cancels_beep() {
        let t0 = Instant::now();
        let mut m = PeerTalkMonitor::new(HOLD, SWEEP);
        m.on_peer_talk_changed(1, false, true, t0);
        m.on_peer_talk_changed(1, true, true, t0 + Duration::from_millis(300));

        assert!(sweep_until(&mut m, t0, Duration::from_secs(2)).is_empty());
        assert!(!m.is_sweeping());
        assert_eq!(m.pending(), 0);
    }

    #[test]
    fn each_stop_beeps_at_most_once() {
        let t0 = Instant::now();
        let mut m = PeerTalkMonitor::new(HOLD, SWEEP);
        for cycle in 0..3u64 {
            let start = t0 + Duration::from_secs(cycle);
            m.on_peer_talk_changed(9, true, true, start);
            m.on_peer_talk_changed(9, false, true, start + Duration::from_millis(100));
        }
        assert_eq!(sweep_until(&mut m, t0, Duration::from_secs(10)).len(), 1);
    }

    #[test]
    fn ptt_follows_channel_talkers() {
        let t0 = Instant::now();
        let mut m = PeerTalkMonitor::new(HOLD, SWEEP);
        assert_eq!(m.on_peer_talk_changed(1, true, true, t0), vec![PeerAction::ActivatePtt]);
        assert_eq!(m.on_peer_talk_changed(2, true, true, t0), vec![PeerAction::ActivatePtt]);
        // Someone in the channel is still talking.
        assert!(m.on_peer_talk_changed(1, false, true, t0).is_empty());
        assert_eq!(
            m.on_peer_talk_changed(2, false, true, t0),
            vec![PeerAction::DeactivatePtt]
        );
    }

    #[test]
    fn other_channel_talkers_do_not_hold_ptt() {
        let t0 = Instant::now();
        let mut m = PeerTalkMonitor::new(HOLD, SWEEP);
        m.on_peer_talk_changed(1, true, false, t0);
        m.on_peer_talk_changed(2, true, true, t0);
        assert_eq!(
            m.on_peer_talk_changed(2, false, true, t0),
            vec![PeerAction::DeactivatePtt]
        );
    }

    #[test]
    fn sweep_stops_when_empty_and_restarts_lazily() {
        let t0 = Instant::now();
        let mut m = PeerTalkMonitor::new(HOLD, SWEEP);
        assert!(!m.is_sweeping());
        m.on_peer_talk_changed(1, false, true, t0);
        assert_eq!(m.next_deadline(), Some(t0 + SWEEP));
        sweep_until(&mut m, t0, Duration::from_secs(1));
        assert!(!m.is_sweeping());

        let later = t0 + Duration::from_secs(5);
        m.on_peer_talk_changed(1, false, true, later);
        assert_eq!(m.next_deadline(), Some(later + SWEEP));
    }

    #[test]
    fn reset_clears_everything() {
        let t0 = Instant::now();
        let mut m = PeerTalkMonitor::new(HOLD, SWEEP);
        m.on_peer_talk_changed(1, true, true, t0);
        m.on_peer_talk_changed(2, false, true, t0);
        assert_eq!(m.reset(), vec![PeerAction::DeactivatePtt]);
        assert!(!m.is_sweeping());
        assert!(m.reset().is_empty());
        assert!(sweep_until(&mut m, t0, Duration::from_secs(2)).is_empty());
    }
}
