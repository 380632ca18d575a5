//! Per-user statistics derived from responses.

use std::collections::HashMap;

use crate::types::{Response, Timestamp, User, UserId, UserStats};

/// Whole-number percentage of `correct` in `total`, rounded to nearest.
/// Zero when nothing was answered.
pub fn accuracy(correct: usize, total: usize) -> u32 {
    if total == 0 {
        return 0;
    }
    ((correct as f64 / total as f64) * 100.0).round() as u32
}

#[derive(Default)]
struct Tally {
    correct: usize,
    total: usize,
    last: Option<Timestamp>,
}

/// One entry per non-deleted user, in the order the users are given.
/// Users without responses get zero counts and no last answer time.
pub fn compute_user_stats(users: &[User], responses: &[Response]) -> Vec<UserStats> {
    let mut tallies: HashMap<&UserId, Tally> = HashMap::new();
    for response in responses {
        let tally = tallies.entry(&response.user_id).or_default();
        tally.total += 1;
        if response.is_correct {
            tally.correct += 1;
        }
        if tally.last.map_or(true, |last| response.answered_at > last) {
            tally.last = Some(response.answered_at);
        }
    }

    users
        .iter()
        .filter(|user| !user.is_deleted)
        .map(|user| {
            let tally = tallies.remove(&user.id).unwrap_or_default();
            UserStats {
                user_id: user.id.clone(),
                user_name: user.name.clone(),
                correct_count: tally.correct,
                total_answered: tally.total,
                accuracy: accuracy(tally.correct, tally.total),
                last_answered_at: tally.last,
            }
        })
        .collect()
}
