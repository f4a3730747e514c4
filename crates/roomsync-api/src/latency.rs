use serde::{Deserialize, Serialize};

use crate::room::{RoomId, SenderId};

/// Aggregate of propagation delays observed by one client, stored once
/// under `<app>/stats/latency`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatencyReport {
    /// Client that observed the samples
    pub sender_id: SenderId,
    pub room_id: RoomId,
    pub saved_at: i64,
    /// Milliseconds between publish and local receipt
    pub samples: Vec<i64>,
    /// Mean of `samples`, rounded half up
    pub average: i64,
}

impl LatencyReport {
    pub fn from_samples(
        sender_id: SenderId,
        room_id: RoomId,
        saved_at: i64,
        samples: Vec<i64>,
    ) -> Self {
        let average = rounded_mean(&samples);
        Self {
            sender_id,
            room_id,
            saved_at,
            samples,
            average,
        }
    }
}

fn rounded_mean(samples: &[i64]) -> i64 {
    if samples.is_empty() {
        return 0;
    }
    let sum: i64 = samples.iter().sum();
    (sum as f64 / samples.len() as f64 + 0.5).floor() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(samples: Vec<i64>) -> LatencyReport {
        LatencyReport::from_samples(SenderId::new("user1"), RoomId::new(3).unwrap(), 0, samples)
    }

    #[test]
    fn test_average_rounds_half_up() {
        assert_eq!(report(vec![10, 20, 30, 41]).average, 25);
        assert_eq!(report(vec![1, 2]).average, 2);
        assert_eq!(report(vec![-1, -2]).average, -1);
    }

    #[test]
    fn test_empty_samples_average_zero() {
        assert_eq!(report(vec![]).average, 0);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(report(vec![5, 7])).unwrap();
        assert_eq!(json["senderId"], "user1");
        assert_eq!(json["roomId"], "room3");
        assert_eq!(json["samples"], serde_json::json!([5, 7]));
        assert_eq!(json["average"], 6);
    }
}
