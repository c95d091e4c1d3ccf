use serde::{Deserialize, Serialize};

/// Map condition names to fixed integer codes `0..n`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionEncoder {
    labels: Vec<Box<str>>,
}

impl ConditionEncoder {
    /// Codes follow the sorted order of the distinct labels
    pub fn fit<L: AsRef<str>>(labels: &[L]) -> Self {
        let mut distinct: Vec<Box<str>> = labels.iter().map(|x| x.as_ref().into()).collect();
        distinct.sort();
        distinct.dedup();
        Self { labels: distinct }
    }

    /// Codes follow the given order
    pub fn from_ordered(labels: Vec<Box<str>>) -> anyhow::Result<Self> {
        let mut sorted = labels.clone();
        sorted.sort();
        if let Some(w) = sorted.windows(2).find(|w| w[0] == w[1]) {
            anyhow::bail!("duplicate condition label '{}'", w[0]);
        }
        Ok(Self { labels })
    }

    pub fn n_conditions(&self) -> usize {
        self.labels.len()
    }

    pub fn labels(&self) -> &[Box<str>] {
        &self.labels
    }

    pub fn encode_one(&self, label: &str) -> anyhow::Result<u32> {
        self.labels
            .iter()
            .position(|x| x.as_ref() == label)
            .map(|k| k as u32)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "unknown condition '{}'; expected one of {:?}",
                    label,
                    self.labels
                )
            })
    }

    pub fn encode<L: AsRef<str>>(&self, labels: &[L]) -> anyhow::Result<Vec<u32>> {
        labels.iter().map(|x| self.encode_one(x.as_ref())).collect()
    }

    pub fn decode(&self, code: u32) -> Option<&str> {
        self.labels.get(code as usize).map(|x| x.as_ref())
    }
}
