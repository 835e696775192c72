//! Concrete layer implementations.

mod activation;
mod add;
mod convolutional;
mod dropout;
mod fully_connected;
mod max_pooling;
mod quantized_fully_connected;

pub use activation::{Activation, ActivationKind};
pub use add::ElementwiseAdd;
pub use convolutional::Conv2d;
pub use dropout::Dropout;
pub use fully_connected::FullyConnected;
pub use max_pooling::MaxPooling;
pub use quantized_fully_connected::QuantizedFullyConnected;
