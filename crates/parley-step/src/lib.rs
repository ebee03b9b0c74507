//! `parley-step`: typed async combinators for validating and extracting data
//! from an event.
//!
//! A [`Step<T, R>`] is an async function `T -> Result<R, Failure>`. A
//! [`Failure`] means "this input does not match" and optionally carries a
//! message meant for the user; it is ordinary control flow. Anything else
//! (a panic) is a defect and is never caught here.
//!
//! ```rust,no_run
//! use parley_step::{certain, Extraction, Step};
//!
//! # async fn demo() {
//! let number: Step<String, i64> = Step::from_fn(|s: String| {
//!     s.trim().parse().map_err(|_| parley_step::Failure::silent())
//! });
//! let positive = number.clone().pass(|n| *n > 0).fail("expected a positive number");
//!
//! let both = certain::<String>().extract_all(
//!     Extraction::new().field("raw", number).field("positive", positive),
//! );
//! let record = both.run("42".to_string()).await.unwrap();
//! assert_eq!(record.get("positive"), Some(&42));
//! # }
//! ```

pub mod error;
pub mod record;
pub mod step;

pub use error::{Failure, StepResult};
pub use record::{Extraction, Record};
pub use step::{certain, die, Step};
