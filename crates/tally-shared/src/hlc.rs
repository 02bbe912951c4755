//! Hybrid logical clock timestamps, `<wallClockMs>:<counter>:<replicaId>`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::HlcError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Hlc {
    pub wall_ms: u64,
    pub counter: u32,
    pub replica: String,
}

impl Hlc {
    pub fn new(wall_ms: u64, counter: u32, replica: impl Into<String>) -> Self {
        Self {
            wall_ms,
            counter,
            replica: replica.into(),
        }
    }
}

impl fmt::Display for Hlc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.wall_ms, self.counter, self.replica)
    }
}

impl FromStr for Hlc {
    type Err = HlcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || HlcError::Malformed(s.to_string());
        let mut parts = s.splitn(3, ':');
        let wall_ms = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(malformed)?;
        let counter = parts
            .next()
            .and_then(|p| p.parse().ok())
            .ok_or_else(malformed)?;
        let replica = parts
            .next()
            .filter(|r| !r.is_empty() && !r.contains(char::is_whitespace))
            .ok_or_else(malformed)?;
        Ok(Self::new(wall_ms, counter, replica))
    }
}

impl Serialize for Hlc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Hlc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Per-replica clock. Timestamps it issues are strictly increasing, even if
/// the wall clock stalls or steps backwards.
#[derive(Debug, Clone)]
pub struct HybridClock {
    replica: String,
    wall_ms: u64,
    counter: u32,
}

impl HybridClock {
    pub fn new(replica: impl Into<String>) -> Self {
        Self {
            replica: replica.into(),
            wall_ms: 0,
            counter: 0,
        }
    }

    pub fn replica(&self) -> &str {
        &self.replica
    }

    pub fn now(&mut self) -> Hlc {
        let wall = chrono::Utc::now().timestamp_millis().max(0) as u64;
        self.tick(wall)
    }

    /// Local event.
    pub fn tick(&mut self, physical_ms: u64) -> Hlc {
        if physical_ms > self.wall_ms {
            self.wall_ms = physical_ms;
            self.counter = 0;
        } else {
            self.counter = self.counter.saturating_add(1);
        }
        self.current()
    }

    /// Merge a timestamp observed on a remote event.
    pub fn receive(&mut self, remote: &Hlc, physical_ms: u64) -> Hlc {
        let wall = physical_ms.max(self.wall_ms).max(remote.wall_ms);
        self.counter = if wall == self.wall_ms && wall == remote.wall_ms {
            self.counter.max(remote.counter).saturating_add(1)
        } else if wall == self.wall_ms {
            self.counter.saturating_add(1)
        } else if wall == remote.wall_ms {
            remote.counter.saturating_add(1)
        } else {
            0
        };
        self.wall_ms = wall;
        self.current()
    }

    fn current(&self) -> Hlc {
        Hlc::new(self.wall_ms, self.counter, self.replica.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_format() {
        let hlc: Hlc = "1700000000000:3:device-a".parse().unwrap();
        assert_eq!(hlc, Hlc::new(1_700_000_000_000, 3, "device-a"));
        assert_eq!(hlc.to_string(), "1700000000000:3:device-a");
    }

    #[test]
    fn test_replica_may_contain_colons() {
        let hlc: Hlc = "5:0:a:b".parse().unwrap();
        assert_eq!(hlc.replica, "a:b");
    }

    #[test]
    fn test_malformed() {
        for bad in ["", "abc", "1:2", "1:2:", "x:2:r", "1:y:r", "-1:0:r", "1:0:has space"] {
            assert!(bad.parse::<Hlc>().is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn test_serde_as_string() {
        let hlc = Hlc::new(10, 2, "r1");
        let json = serde_json::to_string(&hlc).unwrap();
        assert_eq!(json, "\"10:2:r1\"");
        let back: Hlc = serde_json::from_str(&json).unwrap();
        assert_eq!(back, hlc);
        assert!(serde_json::from_str::<Hlc>("\"nope\"").is_err());
    }

    #[test]
    fn test_tick_monotonic_with_stalled_clock() {
        let mut clock = HybridClock::new("r");
        let a = clock.tick(100);
        let b = clock.tick(100);
        let c = clock.tick(50);
        let d = clock.tick(200);
        assert!(a < b && b < c && c < d);
        assert_eq!(c, Hlc::new(100, 2, "r"));
        assert_eq!(d, Hlc::new(200, 0, "r"));
    }

    #[test]
    fn test_receive_advances_past_remote() {
        let mut clock = HybridClock::new("local");
        clock.tick(100);
        let remote = Hlc::new(500, 7, "remote");
        let merged = clock.receive(&remote, 120);
        assert_eq!(merged, Hlc::new(500, 8, "local"));

        let next = clock.tick(130);
        assert!(next > merged);
    }

    #[test]
    fn test_receive_same_wall() {
        let mut clock = HybridClock::new("l");
        clock.tick(100);
        clock.tick(100);
        let merged = clock.receive(&Hlc::new(100, 0, "r"), 90);
        assert_eq!(merged, Hlc::new(100, 2, "l"));
    }

    #[test]
    fn test_receive_physical_ahead() {
        let mut clock = HybridClock::new("l");
        clock.tick(100);
        let merged = clock.receive(&Hlc::new(150, 4, "r"), 300);
        assert_eq!(merged, Hlc::new(300, 0, "l"));
    }
}
