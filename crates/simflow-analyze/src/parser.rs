//! Extension-keyed parsing of fetched output files.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use simflow_core::errors::{ErrorInfo, FlowError, Phase};

/// Content of one file after parsing.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedFile {
    /// `.json` documents.
    Json(Value),
    /// `.csv` tables.
    Csv(CsvTable),
    /// `.txt` files decoded as UTF-8.
    Text(String),
    /// Anything else, or every file of an analyzer that does not parse.
    Raw(Vec<u8>),
}

impl ParsedFile {
    /// The JSON document, if this is one.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ParsedFile::Json(value) => Some(value),
            _ => None,
        }
    }

    /// The table, if this is one.
    pub fn as_csv(&self) -> Option<&CsvTable> {
        match self {
            ParsedFile::Csv(table) => Some(table),
            _ => None,
        }
    }

    /// The text, if this is one.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParsedFile::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The raw bytes, if the file was not parsed.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            ParsedFile::Raw(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// JSON rendering. Raw bytes become an array of numbers.
    pub fn to_json(&self) -> Value {
        match self {
            ParsedFile::Json(value) => value.clone(),
            ParsedFile::Csv(table) => table.to_json(),
            ParsedFile::Text(text) => Value::String(text.clone()),
            ParsedFile::Raw(bytes) => Value::Array(bytes.iter().map(|byte| Value::from(*byte)).collect()),
        }
    }
}

/// Header row plus data rows, cells trimmed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CsvTable {
    /// Column names.
    pub headers: Vec<String>,
    /// Data rows, in file order.
    pub rows: Vec<Vec<String>>,
}

impl CsvTable {
    /// Number of data rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when the table has no data rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cells of the named column.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.headers.iter().position(|header| header == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).map(String::as_str).unwrap_or(""))
                .collect(),
        )
    }

    /// One JSON object per row, keyed by header.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.rows
                .iter()
                .map(|row| {
                    let object: Map<String, Value> = self
                        .headers
                        .iter()
                        .zip(row)
                        .map(|(header, cell)| (header.clone(), Value::String(cell.clone())))
                        .collect();
                    Value::Object(object)
                })
                .collect(),
        )
    }
}

/// Turns the bytes of one file into a [`ParsedFile`].
pub trait FileParser: Send + Sync {
    /// Parses `content`, read from `filename`.
    fn parse(&self, filename: &str, content: &[u8]) -> Result<ParsedFile, FlowError>;
}

fn parse_error(code: &str, filename: &str, err: impl ToString) -> FlowError {
    FlowError::Parse(ErrorInfo::new(code, err.to_string()))
        .with_context("file", filename)
        .with_phase(Phase::Parse)
}

struct JsonParser;

impl FileParser for JsonParser {
    fn parse(&self, filename: &str, content: &[u8]) -> Result<ParsedFile, FlowError> {
        serde_json::from_slice(content)
            .map(ParsedFile::Json)
            .map_err(|err| parse_error("json_parse", filename, err))
    }
}

struct CsvParser;

impl FileParser for CsvParser {
    fn parse(&self, filename: &str, content: &[u8]) -> Result<ParsedFile, FlowError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(content);
        let headers = reader
            .headers()
            .map_err(|err| parse_error("csv_parse", filename, err))?
            .iter()
            .map(str::to_string)
            .collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| parse_error("csv_parse", filename, err))?;
            rows.push(record.iter().map(str::to_string).collect());
        }
        Ok(ParsedFile::Csv(CsvTable { headers, rows }))
    }
}

struct TextParser;

impl FileParser for TextParser {
    fn parse(&self, filename: &str, content: &[u8]) -> Result<ParsedFile, FlowError> {
        String::from_utf8(content.to_vec())
            .map(ParsedFile::Text)
            .map_err(|err| parse_error("text_parse", filename, err))
    }
}

struct RawParser;

impl FileParser for RawParser {
    fn parse(&self, _filename: &str, content: &[u8]) -> Result<ParsedFile, FlowError> {
        Ok(ParsedFile::Raw(content.to_vec()))
    }
}

/// Parsers keyed by lowercase extension, with a raw passthrough for the rest.
#[derive(Clone)]
pub struct ParserRegistry {
    parsers: HashMap<String, Arc<dyn FileParser>>,
    fallback: Arc<dyn FileParser>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        let mut registry = Self {
            parsers: HashMap::new(),
            fallback: Arc::new(RawParser),
        };
        registry.register("json", Arc::new(JsonParser));
        registry.register("csv", Arc::new(CsvParser));
        registry.register("txt", Arc::new(TextParser));
        registry
    }
}

impl fmt::Debug for ParserRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut extensions: Vec<&String> = self.parsers.keys().collect();
        extensions.sort();
        f.debug_struct("ParserRegistry")
            .field("extensions", &extensions)
            .finish()
    }
}

impl ParserRegistry {
    /// Registry with the json, csv and txt parsers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `extension` (without the dot) to `parser`, replacing any previous entry.
    pub fn register(&mut self, extension: &str, parser: Arc<dyn FileParser>) -> &mut Self {
        self.parsers
            .insert(extension.trim_start_matches('.').to_ascii_lowercase(), parser);
        self
    }

    /// Parses `content` with the parser registered for the extension of `filename`.
    pub fn parse(&self, filename: &str, content: &[u8]) -> Result<ParsedFile, FlowError> {
        let parser = extension(filename)
            .and_then(|ext| self.parsers.get(&ext))
            .unwrap_or(&self.fallback);
        parser.parse(filename, content)
    }
}

fn extension(filename: &str) -> Option<String> {
    let name = filename.rsplit('/').next().unwrap_or(filename);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}
