//! Query routing and grounded answer synthesis.

pub mod answer;
pub mod open_loops;
pub mod router;

pub use answer::{AnswerSynthesizer, Citation, SynthesizedAnswer};
pub use open_loops::{open_loops, OpenLoop};
pub use router::{ChatEngine, ChatResponse, QueryType};
