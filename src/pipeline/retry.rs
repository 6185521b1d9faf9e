//! Bounded retry decision for the semantic review loop.

use super::candidate::ValidationResult;

/// What to do after a semantic review.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Review passed; continue to post-processing.
    Proceed,
    /// Regenerate with the failed result as feedback.
    Retry {
        next_iteration: u32,
        feedback: ValidationResult,
    },
    /// No attempts left; escalate as exhausted retries.
    Exhausted {
        final_iteration: u32,
        feedback: ValidationResult,
    },
}

/// Decides whether a failed semantic review loops back to Generate.
///
/// `max_iterations` bounds the number of Generate attempts: every failure
/// consumes one iteration, and the loop exits once the counter reaches the
/// bound. The counter never exceeds `max_iterations`.
#[derive(Debug, Clone, Copy)]
pub struct RetryController {
    max_iterations: u32,
}

impl RetryController {
    pub fn new(max_iterations: u32) -> Self {
        Self { max_iterations }
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    /// Decides the next step for a job currently at `iteration_count`.
    pub fn decide(&self, iteration_count: u32, result: &ValidationResult) -> RetryDecision {
        if result.passed {
            return RetryDecision::Proceed;
        }

        if iteration_count >= self.max_iterations {
            return RetryDecision::Exhausted {
                final_iteration: iteration_count,
                feedback: result.clone(),
            };
        }

        let next_iteration = iteration_count + 1;
        if next_iteration < self.max_iterations {
            RetryDecision::Retry {
                next_iteration,
                feedback: result.clone(),
            }
        } else {
            RetryDecision::Exhausted {
                final_iteration: next_iteration,
                feedback: result.clone(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::candidate::ReasonCode;

    fn failed() -> ValidationResult {
        ValidationResult::fail(ReasonCode::TipLeak, "tip contains the answer")
    }

    #[test]
    fn test_pass_proceeds_without_consuming_iteration() {
        let controller = RetryController::new(2);
        assert_eq!(
            controller.decide(0, &ValidationResult::pass()),
            RetryDecision::Proceed
        );
    }

    #[test]
    fn test_two_failures_exhaust_bound_of_two() {
        let controller = RetryController::new(2);

        let first = controller.decide(0, &failed());
        assert!(matches!(
            first,
            RetryDecision::Retry {
                next_iteration: 1,
                ..
            }
        ));

        let second = controller.decide(1, &failed());
        assert!(matches!(
            second,
            RetryDecision::Exhausted {
                final_iteration: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_zero_bound_escalates_immediately() {
        let controller = RetryController::new(0);
        assert!(matches!(
            controller.decide(0, &failed()),
            RetryDecision::Exhausted {
                final_iteration: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_iteration_never_exceeds_bound() {
        for max in 0..6 {
            let controller = RetryController::new(max);
            let mut iteration = 0;
            let mut attempts = 1;
            loop {
                match controller.decide(iteration, &failed()) {
                    RetryDecision::Retry { next_iteration, .. } => {
                        assert!(next_iteration > iteration);
                        iteration = next_iteration;
                        attempts += 1;
                    }
                    RetryDecision::Exhausted {
                        final_iteration, ..
                    } => {
                        iteration = final_iteration;
                        break;
                    }
                    RetryDecision::Proceed => unreachable!(),
                }
                assert!(iteration <= max);
            }
            assert!(iteration <= max);
            assert_eq!(attempts, max.max(1));
        }
    }

    #[test]
    fn test_counter_already_at_bound_is_not_incremented() {
        let controller = RetryController::new(3);
        assert!(matches!(
            controller.decide(3, &failed()),
            RetryDecision::Exhausted {
                final_iteration: 3,
                ..
            }
        ));
    }
}
