use super::shape::Shape;
use candle_core::DType;
use std::fmt;

/// Stable key of a logical tensor: the producing op and its output name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogicalBlobId {
    pub op_name: String,
    pub blob_name: String,
}

impl LogicalBlobId {
    pub fn new(op_name: &str, blob_name: &str) -> Self {
        Self {
            op_name: op_name.to_string(),
            blob_name: blob_name.to_string(),
        }
    }
}

impl fmt::Display for LogicalBlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.op_name, self.blob_name)
    }
}

/// Logical (unsharded) description of the tensor being moved.
#[derive(Debug, Clone, PartialEq)]
pub struct BlobDesc {
    pub shape: Shape,
    pub data_type: DType,
    pub is_dynamic: bool,
}

impl BlobDesc {
    pub fn new(shape: Shape, data_type: DType) -> Self {
        Self {
            shape,
            data_type,
            is_dynamic: false,
        }
    }

    pub fn byte_size(&self) -> usize {
        self.shape.elem_cnt() * self.data_type.size_in_bytes()
    }
}
