//! Rank to points curve.

/// Curve constant: roughly the first 2/3 of finishers earn more than the
/// baseline point.
pub const CURVE: f64 = 1.5;

/// Points for finishing at zero-based `rank` when `players` humans entered.
///
/// `max(ceil(P / (P^(G/P))^rank), 1)`. Bots do not count towards `players`.
pub fn points(rank: usize, players: usize) -> u32 {
    if players == 0 {
        return 1;
    }
    let p = players as f64;
    let rank = i32::try_from(rank).unwrap_or(i32::MAX);
    let raw = (p / p.powf(CURVE / p).powi(rank)).ceil();
    raw.max(1.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn winner_gets_player_count() {
        assert_eq!(points(0, 3), 3);
        assert_eq!(points(0, 10), 10);
    }

    #[test]
    fn three_player_curve() {
        // 3 / sqrt(3) = 1.73 -> 2
        assert_eq!(points(1, 3), 2);
        // sqrt(3)^2 lands just under 3, so the quotient rounds up to 2
        assert_eq!(points(2, 3), 2);
    }

    #[test]
    fn never_below_one() {
        assert_eq!(points(500, 7), 1);
        assert_eq!(points(3, 1), 1);
    }

    #[test]
    fn no_humans_gives_baseline() {
        assert_eq!(points(0, 0), 1);
        assert_eq!(points(4, 0), 1);
    }

    #[test]
    fn non_increasing_in_rank() {
        for players in 1..=60 {
            let mut last = u32::MAX;
            for rank in 0..players {
                let p = points(rank, players);
                assert!(p >= 1);
                assert!(p <= last, "players={} rank={} {} > {}", players, rank, p, last);
                last = p;
            }
        }
    }
}
