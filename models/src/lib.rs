mod control;
mod digits;
mod language;
mod perceptron;
mod regression;

pub use control::{BestLoss, Decision, LrSchedule, LrStep};
pub use digits::{DigitClassifier, CLASSES, IMAGE_PIXELS};
pub use language::{LanguageClassifier, ALPHABET_SIZE, LANGUAGES};
pub use perceptron::PerceptronModel;
pub use regression::RegressionModel;
