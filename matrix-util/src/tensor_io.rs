use crate::common_io::{Delimiter, read_lines_of_types, write_lines};
use crate::traits::IoOps;
use candle_core::{DType, Device, Tensor};

impl IoOps for Tensor {
    type Scalar = f32;
    type Mat = Self;

    fn read_file_delim(
        tsv_file: &str,
        delim: impl Into<Delimiter>,
        skip: Option<usize>,
    ) -> anyhow::Result<Self::Mat> {
        let data = read_lines_of_types::<f32>(tsv_file, delim, skip)?.lines;

        if data.is_empty() {
            return Err(anyhow::anyhow!("no data in {}", tsv_file));
        }

        let ncols = data[0].len();
        let nrows = data.len();
        if data.iter().any(|r| r.len() != ncols) {
            return Err(anyhow::anyhow!("{}: ragged rows", tsv_file));
        }
        let data = data.into_iter().flatten().collect::<Vec<_>>();

        Ok(Tensor::from_vec(data, (nrows, ncols), &Device::Cpu)?)
    }

    fn write_file_delim(&self, file: &str, delim: &str) -> anyhow::Result<()> {
        let rows = match self.rank() {
            1 => vec![self.to_dtype(DType::F32)?.to_vec1::<f32>()?],
            2 => self.to_dtype(DType::F32)?.to_vec2::<f32>()?,
            r => return Err(anyhow::anyhow!("expected 1 or 2 dimensions, got {}", r)),
        };

        let lines: Vec<Box<str>> = rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|&x| format!("{}", x))
                    .collect::<Vec<_>>()
                    .join(delim)
                    .into_boxed_str()
            })
            .collect();

        write_lines(&lines, file)
    }
}
