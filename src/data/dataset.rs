use burn::data::dataset::Dataset;

use crate::domain::record::TokenizedExample;

/// In-memory collection of tokenized examples, served to Burn's DataLoader.
pub struct SftDataset {
    examples: Vec<TokenizedExample>,
}

impl SftDataset {
    pub fn new(examples: Vec<TokenizedExample>) -> Self { Self { examples } }

    /// Number of examples whose label sequence is empty — they
    /// contribute nothing to the loss.
    pub fn unsupervised_count(&self) -> usize {
        self.examples.iter().filter(|e| e.labels.is_empty()).count()
    }
}

impl Dataset<TokenizedExample> for SftDataset {
    fn get(&self, index: usize) -> Option<TokenizedExample> {
        self.examples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.examples.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_and_len() {
        let ds = SftDataset::new(vec![
            TokenizedExample { input_ids: vec![1, 2], labels: vec![3] },
            TokenizedExample { input_ids: vec![4],    labels: vec![] },
        ]);
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.get(1).unwrap().input_ids, vec![4]);
        assert!(ds.get(2).is_none());
        assert_eq!(ds.unsupervised_count(), 1);
    }
}
