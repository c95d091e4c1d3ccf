use crate::candle_mmd::one_hot_labels;
use candle_core::{Device, Tensor};
use rand::Rng;
use rand::prelude::SliceRandom;

pub struct MinibatchData {
    /// data rows (n x d)
    pub input: Tensor,
    /// condition code of each row
    pub labels: Vec<u32>,
    /// one-hot condition labels (n x c)
    pub onehot: Tensor,
}

/// `DataLoader` for minibatch learning
pub trait DataLoader {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData>;

    fn num_minibatch(&self) -> usize;

    fn num_samples(&self) -> usize;

    /// Partition a random permutation of the samples into chunks of
    /// `batch_size`; the last chunk may be smaller.
    fn shuffle_minibatch<R: Rng>(&mut self, batch_size: usize, rng: &mut R) -> anyhow::Result<()>;

    /// Partition the samples in their original order
    fn ordered_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()>;
}

///
/// A data loader for an in-memory 2d matrix with one condition code
/// per row. Each row will be considered as a feature vector.
///
pub struct LabelledData {
    input: Tensor,
    labels: Vec<u32>,
    n_conditions: usize,
    minibatches: Minibatches,
}

impl LabelledData {
    ///
    /// Create a data loader with the main data tensor `data` (n x d)
    /// and condition codes `labels` in `[0, n_conditions)`
    ///
    pub fn new(data: Tensor, labels: Vec<u32>, n_conditions: usize) -> anyhow::Result<Self> {
        let n = data.dim(0)?;
        if n != labels.len() {
            return Err(anyhow::anyhow!(
                "{} rows of data vs. {} labels",
                n,
                labels.len()
            ));
        }
        if let Some(&k) = labels.iter().find(|&&k| k as usize >= n_conditions) {
            return Err(anyhow::anyhow!(
                "condition code {} out of range [0, {})",
                k,
                n_conditions
            ));
        }

        Ok(LabelledData {
            input: data,
            labels,
            n_conditions,
            minibatches: Minibatches {
                samples: (0..n).collect(),
                chunks: vec![],
            },
        })
    }

    pub fn n_conditions(&self) -> usize {
        self.n_conditions
    }
}

impl DataLoader for LabelledData {
    fn minibatch_data(
        &self,
        batch_idx: usize,
        target_device: &Device,
    ) -> anyhow::Result<MinibatchData> {
        let rows = self.minibatches.chunks.get(batch_idx).ok_or_else(|| {
            anyhow::anyhow!(
                "invalid index = {} vs. total # = {}",
                batch_idx,
                self.num_minibatch()
            )
        })?;

        let idx: Vec<u32> = rows.iter().map(|&i| i as u32).collect();
        let idx = Tensor::from_slice(&idx, idx.len(), self.input.device())?;
        let input = self
            .input
            .index_select(&idx, 0)?
            .to_device(target_device)?;
        let labels: Vec<u32> = rows.iter().map(|&i| self.labels[i]).collect();
        let onehot = one_hot_labels(&labels, self.n_conditions, target_device)?
            .to_dtype(input.dtype())?;

        Ok(MinibatchData {
            input,
            labels,
            onehot,
        })
    }

    fn num_minibatch(&self) -> usize {
        self.minibatches.chunks.len()
    }

    fn num_samples(&self) -> usize {
        self.minibatches.size()
    }

    fn shuffle_minibatch<R: Rng>(&mut self, batch_size: usize, rng: &mut R) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }
        self.minibatches.shuffle_minibatch(batch_size, rng);
        Ok(())
    }

    fn ordered_minibatch(&mut self, batch_size: usize) -> anyhow::Result<()> {
        if batch_size == 0 {
            return Err(anyhow::anyhow!("batch size must be positive"));
        }
        self.minibatches.ordered_minibatch(batch_size);
        Ok(())
    }
}

///
/// A helper `struct` for shuffling and creating minibatch indexes;
/// after `shuffle_minibatch` is called, `chunks` partition indexes.
///
pub struct Minibatches {
    samples: Vec<usize>,
    pub chunks: Vec<Vec<usize>>,
}

impl Minibatches {
    pub fn shuffle_minibatch<R: Rng>(&mut self, batch_size: usize, rng: &mut R) {
        let mut perm = self.samples.clone();
        perm.shuffle(rng);
        self.chunks = perm.chunks(batch_size).map(|c| c.to_vec()).collect();
    }

    pub fn ordered_minibatch(&mut self, batch_size: usize) {
        self.chunks = self
            .samples
            .chunks(batch_size)
            .map(|c| c.to_vec())
            .collect();
    }

    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn toy() -> anyhow::Result<LabelledData> {
        let data = Tensor::arange(0_f32, 14., &Device::Cpu)?.reshape((7, 2))?;
        LabelledData::new(data, vec![0, 1, 0, 1, 2, 2, 0], 3)
    }

    #[test]
    fn shuffled_chunks_cover_every_row_once() -> anyhow::Result<()> {
        let mut data = toy()?;
        let mut rng = StdRng::seed_from_u64(42);
        data.shuffle_minibatch(3, &mut rng)?;
        assert_eq!(data.num_minibatch(), 3);
        assert_eq!(data.num_samples(), 7);

        let mut seen = vec![];
        for b in 0..data.num_minibatch() {
            let mb = data.minibatch_data(b, &Device::Cpu)?;
            let x = mb.input.to_vec2::<f32>()?;
            assert_eq!(x.len(), mb.labels.len());
            assert_eq!(mb.onehot.dims(), &[x.len(), 3]);
            assert_eq!(mb.onehot.dtype(), DType::F32);
            for (row, &k) in x.iter().zip(mb.labels.iter()) {
                let i = (row[0] / 2.) as usize;
                assert_eq!([0, 1, 0, 1, 2, 2, 0][i], k);
                seen.push(i);
            }
        }
        seen.sort();
        assert_eq!(seen, (0..7).collect::<Vec<_>>());
        assert!(data.minibatch_data(3, &Device::Cpu).is_err());
        Ok(())
    }

    #[test]
    fn ordered_chunks_keep_row_order() -> anyhow::Result<()> {
        let mut data = toy()?;
        data.ordered_minibatch(4)?;
        assert_eq!(data.num_minibatch(), 2);
        let last = data.minibatch_data(1, &Device::Cpu)?;
        assert_eq!(last.labels, vec![2, 2, 0]);
        assert!(data.ordered_minibatch(0).is_err());
        Ok(())
    }

    #[test]
    fn reject_inconsistent_labels() -> anyhow::Result<()> {
        let data = Tensor::zeros((3, 2), DType::F32, &Device::Cpu)?;
        assert!(LabelledData::new(data.clone(), vec![0, 1], 2).is_err());
        assert!(LabelledData::new(data, vec![0, 1, 2], 2).is_err());
        Ok(())
    }
}
