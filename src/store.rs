use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::json;
use tracing::info;

use crate::error::Result;
use crate::model::QueryResult;

/// 将聚合结果落盘为 JSON 工件，供调用方事后取用。
pub struct ResultStore {
    output_dir: PathBuf,
}

impl ResultStore {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Write the aggregated result as a pretty-printed JSON file named
    /// `infinity_events_<unix-ts>.json` and return the path.
    pub fn save(
        &self,
        query: &str,
        timeframe: &str,
        product: &str,
        result: &QueryResult,
    ) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.output_dir)?;
        let filename = format!("infinity_events_{}.json", Utc::now().timestamp());
        let path = self.output_dir.join(filename);

        let payload = json!({
            "query": query,
            "timeframe": timeframe,
            "product": product,
            "filter": result.filter_used,
            "total_records": result.total_records,
            "records": result.records,
        });
        let bytes = serde_json::to_vec_pretty(&payload).map_err(std::io::Error::from)?;
        std::fs::write(&path, bytes)?;
        info!(path = %path.display(), total_records = result.total_records, "saved result artifact");
        Ok(path)
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
