pub mod normalize;
pub mod preprocess;
pub mod refresh;
pub mod solver;

pub use refresh::{PerceptualChange, RefreshDetector, SignatureChange};
pub use solver::{
    AttemptOutcome, CaptchaAttempt, CaptchaSolver, SolveBudget, SolveOutcome, SolveState,
    MAX_SOLVE_ATTEMPTS,
};
