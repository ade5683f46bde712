use clap::Args;
use colored::Colorize;
use conduit_query::{QueryCatalog, QueryRequest, Table, WriteMode, WriteRequest};
use conduit_readers::{ReaderService, SourceArgs, TargetArgs, WriterService};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Args)]
pub struct FetchCommand {
    /// Environment name in the configuration document (e.g. DEV, PROD)
    #[arg(long, env = "CONDUIT_ENVIRONMENT")]
    pub environment: String,

    /// Backend to read from: postgres, oracle, s3
    #[arg(long)]
    pub source: String,

    /// S3 bucket
    #[arg(long)]
    pub bucket: Option<String>,

    /// S3 key prefix
    #[arg(long)]
    pub prefix: Option<String>,

    /// S3 file name or glob under the prefix
    #[arg(long, alias = "file_pattern")]
    pub file_pattern: Option<String>,

    /// SQL statement, or an S3 key / s3:// locator
    #[arg(long, conflicts_with = "query_name")]
    pub query: Option<String>,

    /// Named query from the query-definitions file
    #[arg(long)]
    pub query_name: Option<String>,

    /// Positional query parameters, coerced to int, float or bool where possible
    #[arg(long, num_args = 1..)]
    pub params: Vec<String>,

    /// Configuration document
    #[arg(long, env = "CONDUIT_CONFIG", default_value = "db_config.yml")]
    pub config: PathBuf,

    /// Query-definitions file used by --query-name
    #[arg(long, env = "CONDUIT_QUERIES", default_value = "queries.json")]
    pub queries: PathBuf,

    /// Number of rows to print
    #[arg(long, default_value_t = 5)]
    pub preview: usize,

    /// Backend to write the fetched table to; defaults to --source when --mode is given
    #[arg(long)]
    pub target: Option<String>,

    /// Write mode: insert, update or merge
    #[arg(long)]
    pub mode: Option<WriteMode>,

    /// Target table of the write
    #[arg(long)]
    pub table: Option<String>,

    /// Key columns that update and merge match rows on
    #[arg(long, alias = "pk_cols", num_args = 1..)]
    pub pk_cols: Vec<String>,

    /// Object name (or s3:// locator) of an S3 write
    #[arg(long, alias = "output_pattern")]
    pub output_pattern: Option<String>,

    /// File format of an S3 write: csv, json, parquet
    #[arg(long)]
    pub output_format: Option<String>,

    /// Rows per write statement or batch
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

impl FetchCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let (query, catalog_request) = self.resolve_query()?;

        let mut args = SourceArgs::new().with_params(self.params.clone());
        args.bucket = self.bucket.clone();
        args.prefix = self.prefix.clone();
        args.file_pattern = self.file_pattern.clone();
        args.query = query;

        let service = ReaderService::open(&self.config, &self.environment, &self.source, args)?;

        let result = match &catalog_request {
            Some(request) => service.fetch_request(request).await,
            None => service.fetch(None, None).await,
        };

        // Always close; a failed close after a good fetch is only logged
        let closed = service.close().await;
        let table = result?;
        if let Err(e) = closed {
            warn!("Failed to close {} reader: {}", service.kind(), e);
        }

        self.print(&table);

        if let Some(target) = self.write_target() {
            self.write(target, &table).await?;
        }
        Ok(())
    }

    /// Backend to write to, if this run writes at all
    fn write_target(&self) -> Option<&str> {
        match (&self.target, &self.mode) {
            (Some(target), _) => Some(target.as_str()),
            (None, Some(_)) => Some(self.source.as_str()),
            (None, None) => None,
        }
    }

    fn target_args(&self) -> TargetArgs {
        TargetArgs {
            bucket: self.bucket.clone(),
            prefix: self.prefix.clone(),
            file_pattern: self.output_pattern.clone(),
            format: self.output_format.clone(),
            table: self.table.clone(),
        }
    }

    fn write_request(&self) -> WriteRequest {
        let mut request = WriteRequest::new().with_key_columns(self.pk_cols.clone());
        request.table = self.table.clone();
        request.mode = self.mode;
        request.chunk_size = self.chunk_size;
        request.file_pattern = self.output_pattern.clone();
        request.format = self.output_format.clone();
        request
    }

    async fn write(&self, target: &str, table: &Table) -> anyhow::Result<()> {
        let service =
            WriterService::open(&self.config, &self.environment, target, self.target_args())?;
        let result = service.write(table, &self.write_request()).await;

        let closed = service.close().await;
        let summary = result?;
        if let Err(e) = closed {
            warn!("Failed to close {} writer: {}", service.kind(), e);
        }

        info!(
            "Wrote {} rows to {} in {}ms",
            summary.rows_written, summary.target, summary.execution_ms
        );
        println!(
            "{}",
            format!("Wrote {} rows to {}", summary.rows_written, summary.target)
                .bright_green()
                .bold()
        );
        Ok(())
    }

    /// The statement to open with, plus catalog parameters when no
    /// --params were given
    fn resolve_query(&self) -> anyhow::Result<(Option<String>, Option<QueryRequest>)> {
        let Some(name) = &self.query_name else {
            return Ok((self.query.clone(), None));
        };

        let catalog = QueryCatalog::load(&self.queries)?;
        let (sql, params) = catalog.get(name)?;
        debug!("Using named query '{}' with {} parameters", name, params.len());

        let request = (self.params.is_empty() && !params.is_empty())
            .then(|| QueryRequest::new().with_params(params));
        Ok((Some(sql), request))
    }

    fn print(&self, table: &Table) {
        let (rows, columns) = table.shape();
        info!(
            "Fetched {} rows in {}ms",
            table.stats.row_count, table.stats.execution_ms
        );
        println!(
            "{}",
            format!("Fetched {} rows x {} columns", rows, columns)
                .bright_green()
                .bold()
        );

        if self.preview == 0 || rows == 0 {
            return;
        }

        println!("{}", table.schema.column_names().join(" | ").bright_white().bold());
        for row in table.rows.iter().take(self.preview) {
            let cells: Vec<String> = row.iter().map(render_cell).collect();
            println!("{}", cells.join(" | "));
        }
        if rows > self.preview {
            println!("{}", format!("... {} more rows", rows - self.preview).dimmed());
        }
    }
}

fn render_cell(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => "null".to_string(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serde_json::json;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        fetch: FetchCommand,
    }

    fn parse(args: &[&str]) -> FetchCommand {
        let mut argv = vec!["conduit"];
        argv.extend_from_slice(args);
        TestCli::try_parse_from(argv).unwrap().fetch
    }

    #[test]
    fn test_parse_s3_arguments() {
        let cmd = parse(&[
            "--environment",
            "DEV",
            "--source",
            "s3",
            "--bucket",
            "exports",
            "--file-pattern",
            "*.csv",
            "--params",
            "csv",
            "10",
        ]);
        assert_eq!(cmd.source, "s3");
        assert_eq!(cmd.bucket.as_deref(), Some("exports"));
        assert_eq!(cmd.file_pattern.as_deref(), Some("*.csv"));
        assert_eq!(cmd.params, vec!["csv", "10"]);
        assert_eq!(cmd.preview, 5);
    }

    #[test]
    fn test_underscore_aliases() {
        let cmd = parse(&[
            "--environment",
            "DEV",
            "--source",
            "s3",
            "--file_pattern",
            "daily/*.parquet",
            "--pk_cols",
            "EMPNO",
            "DEPTNO",
        ]);
        assert_eq!(cmd.file_pattern.as_deref(), Some("daily/*.parquet"));
        assert_eq!(cmd.pk_cols, vec!["EMPNO", "DEPTNO"]);
    }

    #[test]
    fn test_write_flags() {
        let cmd = parse(&["--environment", "DEV", "--source", "postgres"]);
        assert_eq!(cmd.write_target(), None);

        let cmd = parse(&[
            "--environment",
            "PROD",
            "--source",
            "oracle",
            "--mode",
            "update",
            "--table",
            "HR.EMP",
            "--pk-cols",
            "EMPNO",
            "--chunk-size",
            "1000",
        ]);
        assert_eq!(cmd.write_target(), Some("oracle"));
        let request = cmd.write_request();
        assert_eq!(request.mode, Some(WriteMode::Update));
        assert_eq!(request.table.as_deref(), Some("HR.EMP"));
        assert_eq!(request.key_columns, vec!["EMPNO"]);
        assert_eq!(request.chunk_size, Some(1000));

        let cmd = parse(&[
            "--environment",
            "PROD",
            "--source",
            "postgres",
            "--target",
            "s3",
            "--bucket",
            "exports",
            "--output-pattern",
            "emp.parquet",
        ]);
        assert_eq!(cmd.write_target(), Some("s3"));
        let args = cmd.target_args();
        assert_eq!(args.bucket.as_deref(), Some("exports"));
        assert_eq!(args.file_pattern.as_deref(), Some("emp.parquet"));
        assert_eq!(cmd.write_request().mode, None);

        assert!(TestCli::try_parse_from([
            "conduit",
            "--environment",
            "DEV",
            "--source",
            "postgres",
            "--mode",
            "replace",
        ])
        .is_err());
    }

    #[test]
    fn test_query_and_query_name_conflict() {
        let result = TestCli::try_parse_from([
            "conduit",
            "--environment",
            "DEV",
            "--source",
            "postgres",
            "--query",
            "SELECT 1",
            "--query-name",
            "q",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_named_query_uses_catalog_params() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.json");
        std::fs::write(
            &path,
            r#"{"by_dept": {"sql": "SELECT * FROM emp WHERE dept_id = $1", "params": [10]}}"#,
        )
        .unwrap();

        let mut cmd = parse(&["--environment", "DEV", "--source", "postgres"]);
        cmd.query_name = Some("by_dept".to_string());
        cmd.queries = path;

        let (query, request) = cmd.resolve_query().unwrap();
        assert_eq!(query.as_deref(), Some("SELECT * FROM emp WHERE dept_id = $1"));
        let request = request.unwrap();
        assert_eq!(request.params.as_deref(), Some(&[conduit_query::ParamValue::Int(10)][..]));

        cmd.params = vec!["20".to_string()];
        let (_, request) = cmd.resolve_query().unwrap();
        assert!(request.is_none());
    }

    #[test]
    fn test_render_cell() {
        assert_eq!(render_cell(&json!(null)), "null");
        assert_eq!(render_cell(&json!("abc")), "abc");
        assert_eq!(render_cell(&json!(1.5)), "1.5");
    }
}
