// ============================================================
// Layer 2 — PrepareUseCase
// ============================================================
// Runs the data half of the pipeline only and writes the
// result for inspection:
//
//   data.jsonl → format → tokenize → tokenized.jsonl
//
// Each output line is one TokenizedExample:
//   {"input_ids":[...],"labels":[...]}

use anyhow::{Context, Result};
use std::{
    fs::{self, File},
    io::{BufWriter, Write},
    path::PathBuf,
};

use crate::application::train_use_case::prepare_examples;
use crate::data::{loader::JsonlLoader, tokenize::TokenizeLimits};
use crate::infra::model_dir::ModelDirectory;

#[derive(Debug, Clone)]
pub struct PrepareConfig {
    pub data_path:   PathBuf,
    pub model_dir:   PathBuf,
    pub output_path: PathBuf,
    pub limits:      TokenizeLimits,
}

pub struct PrepareUseCase {
    config: PrepareConfig,
}

impl PrepareUseCase {
    pub fn new(config: PrepareConfig) -> Self {
        Self { config }
    }

    /// Returns the number of examples written
    pub fn execute(&self) -> Result<usize> {
        let cfg = &self.config;

        let tokenizer = ModelDirectory::new(&cfg.model_dir).load_tokenizer()?;
        let examples  = prepare_examples(&JsonlLoader::new(&cfg.data_path), &tokenizer, cfg.limits)?;

        if let Some(parent) = cfg.output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create '{}'", parent.display()))?;
        }

        let file = File::create(&cfg.output_path)
            .with_context(|| format!("Cannot create '{}'", cfg.output_path.display()))?;
        let mut out = BufWriter::new(file);
        for example in &examples {
            serde_json::to_writer(&mut out, example)?;
            writeln!(out)?;
        }
        out.flush()
            .with_context(|| format!("Cannot write '{}'", cfg.output_path.display()))?;

        tracing::info!(
            "Wrote {} tokenized examples to '{}'",
            examples.len(),
            cfg.output_path.display()
        );
        Ok(examples.len())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::record::TokenizedExample;
    use crate::infra::tokenizer_store::TokenizerStore;

    #[test]
    fn test_prepare_writes_one_line_per_record() {
        let dir  = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.jsonl");
        fs::write(
            &data,
            concat!(
                r#"{"instruction":"Translate to French","input":"Hello","output":"Bonjour"}"#, "\n",
                "\n",
                r#"{"instruction":"Summarize","input":"","output":"short text"}"#, "\n",
            ),
        ).unwrap();

        let model_dir = dir.path().join("base");
        TokenizerStore::new(&model_dir)
            .build_and_save(
                &["instruction translate to french input hello answer bonjour summarize short text".to_string()],
                100,
            )
            .unwrap();

        let output = dir.path().join("out").join("tokenized.jsonl");
        let count  = PrepareUseCase::new(PrepareConfig {
            data_path:   data,
            model_dir,
            output_path: output.clone(),
            limits:      TokenizeLimits::default(),
        })
        .execute()
        .unwrap();
        assert_eq!(count, 2);

        let text = fs::read_to_string(&output).unwrap();
        let rows: Vec<TokenizedExample> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows.len(), 2);
        // "Instruction: Summarize\nAnswer:" → instruction : summarize answer :
        assert_eq!(rows[1].input_ids.len(), 5);
        assert_eq!(rows[1].labels.len(), 2);
    }

    #[test]
    fn test_prepare_without_tokenizer_fails() {
        let dir  = tempfile::tempdir().unwrap();
        let data = dir.path().join("data.jsonl");
        fs::write(&data, "{\"instruction\":\"a\",\"input\":\"\",\"output\":\"b\"}\n").unwrap();

        let result = PrepareUseCase::new(PrepareConfig {
            data_path:   data,
            model_dir:   dir.path().join("missing"),
            output_path: dir.path().join("out.jsonl"),
            limits:      TokenizeLimits::default(),
        })
        .execute();
        assert!(result.is_err());
    }
}
