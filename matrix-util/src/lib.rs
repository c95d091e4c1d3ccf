pub mod common_io;
pub mod dmatrix_io;
pub mod mtx_io;
pub mod tensor_io;
pub mod traits;
pub mod utils;
