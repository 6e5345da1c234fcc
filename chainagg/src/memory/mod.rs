mod buffer;

pub use buffer::GrowableBuffer;
