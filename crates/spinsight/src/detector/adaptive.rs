//! Adaptive Hough accumulator-threshold loop.
//!
//! The detector runs the circle transform repeatedly, walking `param2`
//! between its configured bounds until the circle count lands in the
//! accepted window. The state machine lives here as a pure function over a
//! closure so it can be tested without images.

use crate::ball::Circle;
use crate::strategy::ModeParams;

/// Run the adaptive loop. `run` executes one Hough pass (including
/// concentric dedup) at the given `param2` and returns the circles found.
///
/// Returns the accepted circle set; empty means the search failed even at
/// the loosest parameters. Termination: every iteration either returns or
/// moves `param2` by one increment toward a bound, and both bounds
/// terminate, so the loop runs at most
/// `ceil((max_param2 - min_param2) / increment) + 2` iterations.
pub fn adaptive_hough<F>(params: &ModeParams, mut run: F) -> Vec<Circle>
where
    F: FnMut(f32) -> Vec<Circle>,
{
    let mut retained: Vec<Circle> = Vec::new();
    let mut param2 = params.starting_param2;
    let mut loosening = false;

    loop {
        let test = run(param2);
        let prior = retained.len();
        let n = test.len();
        tracing::trace!("adaptive pass: param2={param2} -> {n} circles (prior {prior})");

        if n >= params.min_circles && n <= params.max_circles {
            return test;
        }

        if n > params.max_circles {
            if prior == 0 && (param2 - params.starting_param2).abs() > f32::EPSILON {
                // Had nothing before, now too many: better than nothing.
                return test;
            }
            if param2 >= params.max_param2 {
                return test;
            }
            retained = test;
            param2 += params.param2_increment;
            loosening = false;
            continue;
        }

        // Too few circles.
        if n == 0 && prior == 0 {
            if param2 <= params.min_param2 {
                return Vec::new();
            }
            param2 -= params.param2_increment;
            loosening = true;
        } else if (n > 0 && prior == 0) || loosening {
            if param2 <= params.min_param2 {
                return test;
            }
            retained = test;
            param2 -= params.param2_increment;
            loosening = true;
        } else {
            // Tightening jumped from too-many straight past the window:
            // the retained over-full set is the better answer.
            return retained;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BallIdentification;
    use crate::strategy::{mode_params, SearchMode};

    fn params(start: f32, min: f32, max: f32, inc: f32, window: (usize, usize)) -> ModeParams {
        let mut p = mode_params(&BallIdentification::default(), SearchMode::Placed);
        p.starting_param2 = start;
        p.min_param2 = min;
        p.max_param2 = max;
        p.param2_increment = inc;
        p.min_circles = window.0;
        p.max_circles = window.1;
        p
    }

    fn circles(n: usize) -> Vec<Circle> {
        (0..n)
            .map(|i| Circle::new(i as f32 * 50.0, 10.0, 12.0))
            .collect()
    }

    #[test]
    fn accepts_immediately_inside_window() {
        let p = params(40.0, 30.0, 60.0, 4.0, (1, 3));
        let mut calls = 0;
        let out = adaptive_hough(&p, |_| {
            calls += 1;
            circles(2)
        });
        assert_eq!(out.len(), 2);
        assert_eq!(calls, 1);
    }

    #[test]
    fn tightens_until_window() {
        let p = params(40.0, 30.0, 60.0, 4.0, (1, 4));
        let out = adaptive_hough(&p, |p2| if p2 < 52.0 { circles(20) } else { circles(2) });
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn loosens_and_accepts_overshoot() {
        let p = params(40.0, 30.0, 60.0, 4.0, (1, 4));
        // Nothing until the threshold drops, then suddenly many.
        let out = adaptive_hough(&p, |p2| if p2 >= 40.0 { circles(0) } else { circles(9) });
        assert_eq!(out.len(), 9, "an overshoot after zero is accepted");
    }

    #[test]
    fn fails_cleanly_when_nothing_exists() {
        let p = params(40.0, 30.0, 60.0, 4.0, (1, 4));
        let mut calls = 0;
        let out = adaptive_hough(&p, |_| {
            calls += 1;
            Vec::new()
        });
        assert!(out.is_empty());
        let bound = ((p.max_param2 - p.min_param2) / p.param2_increment).ceil() as usize + 2;
        assert!(calls <= bound, "{calls} iterations > bound {bound}");
    }

    #[test]
    fn returns_prior_when_overtightened_to_zero() {
        let p = params(40.0, 30.0, 60.0, 4.0, (1, 4));
        let out = adaptive_hough(&p, |p2| if p2 <= 40.0 { circles(7) } else { circles(0) });
        // 7 > max -> tighten (retain 7) -> 0 with prior -> prior wins.
        assert_eq!(out.len(), 7);
    }

    #[test]
    fn ceiling_accepts_current_set() {
        let p = params(56.0, 30.0, 60.0, 4.0, (1, 4));
        let out = adaptive_hough(&p, |_| circles(12));
        assert_eq!(out.len(), 12, "at the param2 ceiling the set is accepted");
    }

    #[test]
    fn terminates_within_bound_for_adversarial_counts() {
        let p = params(40.0, 30.0, 60.0, 4.0, (2, 3));
        let bound = ((p.max_param2 - p.min_param2) / p.param2_increment).ceil() as usize + 2;
        for phase in 0..8u32 {
            let mut calls = 0usize;
            let _ = adaptive_hough(&p, |p2| {
                calls += 1;
                assert!(calls <= bound + 1, "loop exceeded termination bound");
                let pseudo = ((p2 as u32).wrapping_mul(2654435761).wrapping_add(phase) >> 7) % 9;
                circles(pseudo as usize)
            });
        }
    }
}
