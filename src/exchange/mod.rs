pub mod batch;
pub mod translate;

pub use batch::BatchProcessor;
pub use translate::{PayloadValidator, StructuralValidator, Translator};
