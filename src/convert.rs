//! Percent <-> step-domain conversion.
//!
//! The device models speed as discrete steps (0-3) and oscillation speed as
//! 0-1, while the framework speaks 0-100 percent. Rounding is half-away-from-
//! zero, matching the controller firmware on the positive domain. Inputs
//! outside the declared ranges are computed arithmetically, not clamped.

pub fn percent_to_steps(percent: f64, steps: u8) -> i32 {
    (percent / 100.0 * f64::from(steps)).round() as i32
}

pub fn steps_to_percent(step: i32, steps: u8) -> i32 {
    (100.0 * f64::from(step) / f64::from(steps)).round() as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{OSCILLATE_SPEED_STEPS, SPEED_STEPS};

    #[test]
    fn percent_to_steps_fixed_points() {
        assert_eq!(percent_to_steps(0.0, SPEED_STEPS), 0);
        assert_eq!(percent_to_steps(100.0, SPEED_STEPS), 3);
        // 50% of 3 steps is 1.5, rounded half-up.
        assert_eq!(percent_to_steps(50.0, SPEED_STEPS), 2);
        assert_eq!(percent_to_steps(33.0, SPEED_STEPS), 1);
        assert_eq!(percent_to_steps(60.0, SPEED_STEPS), 2);
    }

    #[test]
    fn steps_to_percent_fixed_points() {
        assert_eq!(steps_to_percent(0, SPEED_STEPS), 0);
        assert_eq!(steps_to_percent(1, SPEED_STEPS), 33);
        assert_eq!(steps_to_percent(2, SPEED_STEPS), 67);
        assert_eq!(steps_to_percent(3, SPEED_STEPS), 100);
    }

    #[test]
    fn oscillate_speed_domain() {
        assert_eq!(percent_to_steps(0.0, OSCILLATE_SPEED_STEPS), 0);
        assert_eq!(percent_to_steps(49.0, OSCILLATE_SPEED_STEPS), 0);
        assert_eq!(percent_to_steps(50.0, OSCILLATE_SPEED_STEPS), 1);
        assert_eq!(percent_to_steps(100.0, OSCILLATE_SPEED_STEPS), 1);
        assert_eq!(steps_to_percent(1, OSCILLATE_SPEED_STEPS), 100);
    }

    #[test]
    fn round_trip_within_one_step_of_error() {
        for steps in [1u8, 3] {
            let step_percent = 100.0 / f64::from(steps);
            for p in 0..=100 {
                let round_tripped =
                    steps_to_percent(percent_to_steps(f64::from(p), steps), steps);
                let err = (f64::from(round_tripped) - f64::from(p)).abs();
                assert!(
                    err <= step_percent / 2.0 + 1.0,
                    "p={p} steps={steps} round_tripped={round_tripped}"
                );
            }
        }
    }

    #[test]
    fn out_of_range_inputs_are_not_clamped() {
        assert_eq!(percent_to_steps(150.0, SPEED_STEPS), 5);
        assert_eq!(steps_to_percent(4, SPEED_STEPS), 133);
    }
}
