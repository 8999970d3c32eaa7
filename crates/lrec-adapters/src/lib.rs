//! Schema normalizer for semicolon-delimited listing exports.
//!
//! Raw export bytes go through four stages: text decoding, header-line
//! detection inside leading noise, table parsing with every cell read as
//! text, and column mapping onto the canonical [`Attribute`] set through the
//! ordered [`COLUMN_RULES`] table.

use std::collections::HashSet;

use encoding_rs::{UTF_8, WINDOWS_1252};
use lrec_core::{Attribute, ListingKey, ListingPayload, ListingRecord};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "lrec-adapters";

/// Column-name fragments expected on the header line, including the
/// spellings produced when accented headers are decoded with the wrong
/// encoding.
pub const HEADER_MARKERS: &[&str] = &[
    "Nº do imóvel",
    "N° do imóvel",
    "N do imóvel",
    "No do imóvel",
    "N do imvel",
    "UF",
    "Cidade",
    "Bairro",
    "Endereço",
    "Endereo",
    "Preo",
    "Preço",
    "Valor de avalia",
    "Descri",
    "Modalidade",
    "Link",
];

/// Minimum number of [`HEADER_MARKERS`] a line must contain to be the header.
pub const HEADER_MIN_SCORE: usize = 3;

/// Cell tokens read as a missing value.
const NULL_TOKENS: &[&str] = &["", "nan", "None"];

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("no header line found: no line contains {min_score} of the expected column markers")]
    HeaderNotFound { min_score: usize },
    #[error("malformed semicolon table: {0}")]
    Table(#[from] csv::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("missing key column; columns received: {columns:?}")]
    MissingKeyColumn { columns: Vec<String> },
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding: &'static str,
    pub lossy: bool,
}

/// Decodes with UTF-8 (BOM tolerated), then Windows-1252, then lossy UTF-8.
/// Never fails.
pub fn decode_bytes(raw: &[u8]) -> DecodedText {
    let body = raw.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(raw);
    for encoding in [UTF_8, WINDOWS_1252] {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(body) {
            return DecodedText {
                text: text.into_owned(),
                encoding: encoding.name(),
                lossy: false,
            };
        }
    }
    DecodedText {
        text: String::from_utf8_lossy(body).into_owned(),
        encoding: "UTF-8 (lossy)",
        lossy: true,
    }
}

/// Splits on `\n`, `\r\n` and bare `\r` alike.
pub fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find(|c| c == '\r' || c == '\n') {
        lines.push(&rest[..pos]);
        let skip = if rest[pos..].starts_with("\r\n") { 2 } else { 1 };
        rest = &rest[pos + skip..];
    }
    lines.push(rest);
    lines
}

/// Number of distinct [`HEADER_MARKERS`] found in `line`, case-insensitively.
pub fn header_score(line: &str) -> usize {
    let lower = line.to_lowercase();
    HEADER_MARKERS
        .iter()
        .filter(|marker| lower.contains(&marker.to_lowercase()))
        .count()
}

/// Index of the first line scoring at least [`HEADER_MIN_SCORE`].
pub fn find_header_line(lines: &[&str]) -> Option<usize> {
    lines
        .iter()
        .position(|line| header_score(line) >= HEADER_MIN_SCORE)
}

/// One entry of the column mapping table.
///
/// Rules are tried in order and the first rule whose `claims` predicate
/// accepts the lower-cased, trimmed column name decides the outcome. When the
/// claiming rule has a `guard` that rejects the name, the column stays
/// unmapped and no later rule is consulted.
#[derive(Debug, Clone, Copy)]
pub struct ColumnRule {
    pub target: Attribute,
    pub claims: fn(&str) -> bool,
    pub guard: Option<fn(&str) -> bool>,
}

pub const COLUMN_RULES: &[ColumnRule] = &[
    ColumnRule {
        target: Attribute::ListingId,
        claims: |name| claims_accented_listing_id(name) && looks_like_number_label(name),
        guard: None,
    },
    ColumnRule {
        target: Attribute::ListingId,
        claims: claims_listing_id,
        guard: Some(looks_like_number_label),
    },
    ColumnRule {
        target: Attribute::Price,
        claims: claims_price,
        guard: None,
    },
    ColumnRule {
        target: Attribute::AppraisalValue,
        claims: |name| name.contains("valor") && name.contains("avalia"),
        guard: None,
    },
    ColumnRule {
        target: Attribute::Address,
        claims: |name| name.contains("endere"),
        guard: None,
    },
    ColumnRule {
        target: Attribute::Description,
        claims: |name| name.contains("descri"),
        guard: None,
    },
    ColumnRule {
        target: Attribute::SaleModality,
        claims: |name| name.contains("modalidade") && name.contains("venda"),
        guard: None,
    },
    ColumnRule {
        target: Attribute::Discount,
        claims: |name| name.contains("desconto"),
        guard: None,
    },
    ColumnRule {
        target: Attribute::Region,
        claims: |name| name == "uf",
        guard: None,
    },
    ColumnRule {
        target: Attribute::City,
        claims: |name| name.contains("cidade"),
        guard: None,
    },
    ColumnRule {
        target: Attribute::Neighborhood,
        claims: |name| name.contains("bairro"),
        guard: None,
    },
    ColumnRule {
        target: Attribute::AccessLink,
        claims: |name| name.contains("link"),
        guard: None,
    },
];

fn claims_accented_listing_id(name: &str) -> bool {
    name.contains("imóvel") || name.contains("imã³vel")
}

fn claims_listing_id(name: &str) -> bool {
    name.contains("im")
        && ["mov", "mv", "movel", "mvel", "imvel", "imovel"]
            .iter()
            .any(|fragment| name.contains(fragment))
}

fn looks_like_number_label(name: &str) -> bool {
    name.starts_with('n') || ["n ", "n°", "nº", "no"].iter().any(|fragment| name.contains(fragment))
}

fn claims_price(name: &str) -> bool {
    name == "preo" || name == "preço" || (name.contains("pre") && name.contains("co"))
}

/// Canonical attribute for a raw column name, `None` for pass-through columns.
pub fn map_column(raw_name: &str) -> Option<Attribute> {
    let name = raw_name.trim().to_lowercase();
    let rule = COLUMN_RULES.iter().find(|rule| (rule.claims)(&name))?;
    match rule.guard {
        Some(guard) if !guard(&name) => None,
        _ => Some(rule.target),
    }
}

/// Trimmed cell text with control characters removed, or `None` for blank
/// cells and the null tokens.
pub fn clean_cell(raw: &str) -> Option<String> {
    let cleaned = raw.chars().filter(|c| !c.is_control()).collect::<String>();
    let trimmed = cleaned.trim();
    if NULL_TOKENS.contains(&trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ColumnTarget {
    Canonical(Attribute),
    Extra(String),
}

#[derive(Debug, Clone)]
struct Column {
    position: usize,
    name: String,
    target: ColumnTarget,
}

/// Normalized rows of one export plus what happened on the way.
#[derive(Debug, Clone)]
pub struct NormalizedArtifact {
    pub records: Vec<ListingRecord>,
    pub encoding: &'static str,
    pub lossy_decode: bool,
    pub header_line: usize,
    pub table_rows: usize,
    pub dropped_without_id: usize,
    pub duplicates: usize,
    pub unmapped_columns: Vec<String>,
    pub region_from_hint: bool,
}

/// Normalizes one export into listing records, in source order.
///
/// # Errors
///
/// `ParseError::HeaderNotFound` when no line looks like the header,
/// `ParseError::Table` on malformed quoting, and
/// `SchemaError::MissingKeyColumn` when no column maps to the listing id.
pub fn normalize(
    raw: &[u8],
    region_hint: &str,
    source_artifact: &str,
) -> Result<Vec<ListingRecord>, NormalizeError> {
    normalize_artifact(raw, region_hint, source_artifact).map(|out| out.records)
}

/// Same as [`normalize`], also reporting decode and cleaning statistics.
pub fn normalize_artifact(
    raw: &[u8],
    region_hint: &str,
    source_artifact: &str,
) -> Result<NormalizedArtifact, NormalizeError> {
    let decoded = decode_bytes(raw);
    let lines = split_lines(&decoded.text);
    let header_line = find_header_line(&lines).ok_or(ParseError::HeaderNotFound {
        min_score: HEADER_MIN_SCORE,
    })?;

    let body = lines[header_line..]
        .iter()
        .filter(|line| !line.trim().is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n");

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .from_reader(body.as_bytes());

    let columns = resolve_columns(reader.headers().map_err(ParseError::from)?);
    let has_key = columns
        .iter()
        .any(|c| c.target == ColumnTarget::Canonical(Attribute::ListingId));
    if !has_key {
        return Err(SchemaError::MissingKeyColumn {
            columns: columns.iter().map(|c| c.name.clone()).collect(),
        }
        .into());
    }

    let mut payloads = Vec::new();
    for record in reader.records() {
        let record = record.map_err(ParseError::from)?;
        let mut payload = ListingPayload::default();
        for column in &columns {
            let value = record.get(column.position).and_then(clean_cell);
            match &column.target {
                ColumnTarget::Canonical(attr) => payload.set(*attr, value),
                ColumnTarget::Extra(name) => {
                    if let Some(value) = value {
                        payload.extra.insert(name.clone(), value);
                    }
                }
            }
        }
        payloads.push(payload);
    }
    let table_rows = payloads.len();

    let hint = region_hint.trim().to_uppercase();
    let region_from_hint = payloads.iter().all(|p| p.region.is_none());
    for payload in &mut payloads {
        let region = match payload.region.take() {
            Some(region) if !region_from_hint => region.trim().to_uppercase(),
            _ => hint.clone(),
        };
        payload.region = Some(region);
        payload.listing_id = payload
            .listing_id
            .take()
            .map(|id| id.chars().filter(|c| !c.is_whitespace()).collect::<String>())
            .filter(|id| !id.is_empty());
    }

    let mut seen: HashSet<ListingKey> = HashSet::new();
    let mut records = Vec::with_capacity(payloads.len());
    let mut dropped_without_id = 0usize;
    let mut duplicates = 0usize;
    for payload in payloads {
        let Some(record) = ListingRecord::from_payload(payload, source_artifact) else {
            dropped_without_id += 1;
            continue;
        };
        if seen.insert(record.key.clone()) {
            records.push(record);
        } else {
            duplicates += 1;
        }
    }

    let unmapped_columns = columns
        .iter()
        .filter_map(|c| match &c.target {
            ColumnTarget::Extra(name) => Some(name.clone()),
            ColumnTarget::Canonical(_) => None,
        })
        .collect::<Vec<_>>();

    debug!(
        source_artifact,
        encoding = decoded.encoding,
        header_line,
        table_rows,
        kept = records.len(),
        dropped_without_id,
        duplicates,
        "normalized export"
    );

    Ok(NormalizedArtifact {
        records,
        encoding: decoded.encoding,
        lossy_decode: decoded.lossy,
        header_line,
        table_rows,
        dropped_without_id,
        duplicates,
        unmapped_columns,
        region_from_hint,
    })
}

/// Drops blank headers and maps the rest; a second column resolving to an
/// attribute already taken is kept as a pass-through column.
fn resolve_columns(headers: &csv::StringRecord) -> Vec<Column> {
    let mut taken: HashSet<Attribute> = HashSet::new();
    headers
        .iter()
        .enumerate()
        .filter_map(|(position, raw)| {
            let name = raw.trim();
            if name.is_empty() {
                return None;
            }
            let target = match map_column(name) {
                Some(attr) if taken.insert(attr) => ColumnTarget::Canonical(attr),
                _ => ColumnTarget::Extra(name.to_string()),
            };
            Some(Column {
                position,
                name: name.to_string(),
                target,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = " N° do imóvel;UF;Cidade;Bairro;Endereço;Preço;Valor de avaliação;Desconto;Descrição;Modalidade de venda;Link de acesso;";

    fn export(rows: &[&str]) -> String {
        let mut text = String::from(" Lista de Imóveis da Caixa;;;\n;;;\n");
        text.push_str(HEADER);
        text.push('\n');
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }

    const ROW_1: &str = "8444400000001 ;SP;SAO PAULO;CENTRO;RUA A, 1;100.000,00;150.000,00;33,33;Casa;Venda Online;https://venda-imoveis.caixa.gov.br/1;";
    const ROW_2: &str = "8444400000002;SP;SANTOS;GONZAGA;AV B, 2;200.000,00;210.000,00;4,76;Apartamento;Leilão SFI - Edital Único;https://venda-imoveis.caixa.gov.br/2;";

    #[test]
    fn parses_a_typical_export() {
        let records = normalize(export(&[ROW_1, ROW_2]).as_bytes(), "SP", "UF=SP/Lista_imoveis_SP.csv").unwrap();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.key, ListingKey::new("SP", "8444400000001"));
        assert_eq!(first.payload.city.as_deref(), Some("SAO PAULO"));
        assert_eq!(first.payload.address.as_deref(), Some("RUA A, 1"));
        assert_eq!(first.payload.price.as_deref(), Some("100.000,00"));
        assert_eq!(first.payload.appraisal_value.as_deref(), Some("150.000,00"));
        assert_eq!(first.payload.discount.as_deref(), Some("33,33"));
        assert_eq!(first.payload.description.as_deref(), Some("Casa"));
        assert_eq!(first.payload.sale_modality.as_deref(), Some("Venda Online"));
        assert_eq!(
            first.payload.access_link.as_deref(),
            Some("https://venda-imoveis.caixa.gov.br/1")
        );
        assert!(first.payload.extra.is_empty());
        assert_eq!(first.source_artifact, "UF=SP/Lista_imoveis_SP.csv");
    }

    #[test]
    fn leading_garbage_does_not_change_the_result() {
        let clean = format!("{HEADER}\n{ROW_1}\n{ROW_2}\n");
        let noisy = format!(
            "garbage one\n;;;;\nExportado em 01/03/2026\n\nmore noise;x;y\n{clean}"
        );
        let a = normalize(clean.as_bytes(), "SP", "a.csv").unwrap();
        let b = normalize(noisy.as_bytes(), "SP", "a.csv").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 2);
    }

    #[test]
    fn header_line_is_first_line_reaching_the_threshold() {
        let lines = ["Cidade e Bairro", "UF;Cidade;Bairro", "Nº do imóvel;UF;Cidade;Bairro"];
        assert_eq!(header_score(lines[0]), 2);
        assert_eq!(find_header_line(&lines), Some(1));
        assert_eq!(find_header_line(&["nothing here", "x;y;z"]), None);
    }

    #[test]
    fn header_not_found_is_a_parse_error() {
        let err = normalize(b"just;some;text\n1;2;3\n", "SP", "a.csv").unwrap_err();
        assert!(matches!(
            err,
            NormalizeError::Parse(ParseError::HeaderNotFound { min_score: 3 })
        ));
    }

    #[test]
    fn missing_key_column_is_a_schema_error() {
        let text = "UF;Cidade;Bairro;Preço\nSP;SAO PAULO;CENTRO;1\n";
        let err = normalize(text.as_bytes(), "SP", "a.csv").unwrap_err();
        match err {
            NormalizeError::Schema(SchemaError::MissingKeyColumn { columns }) => {
                assert_eq!(columns, vec!["UF", "Cidade", "Bairro", "Preço"]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn windows_1252_exports_decode_and_map() {
        let bytes = b"N\xb0 do im\xf3vel;UF;Cidade;Bairro;Pre\xe7o\n123;SP;S\xc3O PAULO;CENTRO;1,00\n";
        let decoded = decode_bytes(bytes);
        assert_eq!(decoded.encoding, "windows-1252");
        assert!(decoded.text.starts_with("N° do imóvel;"));

        let records = normalize(bytes, "SP", "a.csv").unwrap();
        assert_eq!(records[0].payload.price.as_deref(), Some("1,00"));
        assert_eq!(records[0].payload.city.as_deref(), Some("SÃO PAULO"));
    }

    #[test]
    fn utf8_bom_is_stripped() {
        let mut bytes = b"\xEF\xBB\xBF".to_vec();
        bytes.extend_from_slice(format!("{HEADER}\n{ROW_1}\n").as_bytes());
        let decoded = decode_bytes(&bytes);
        assert_eq!(decoded.encoding, "UTF-8");
        assert!(!decoded.text.starts_with('\u{feff}'));
        assert_eq!(normalize(&bytes, "SP", "a.csv").unwrap().len(), 1);
    }

    #[test]
    fn all_line_ending_styles_split_the_same() {
        assert_eq!(split_lines("a\r\nb\rc\nd"), vec!["a", "b", "c", "d"]);
        let crlf = export(&[ROW_1, ROW_2]).replace('\n', "\r\n");
        let cr = export(&[ROW_1, ROW_2]).replace('\n', "\r");
        let lf = export(&[ROW_1, ROW_2]);
        let a = normalize(lf.as_bytes(), "SP", "a.csv").unwrap();
        assert_eq!(a, normalize(crlf.as_bytes(), "SP", "a.csv").unwrap());
        assert_eq!(a, normalize(cr.as_bytes(), "SP", "a.csv").unwrap());
    }

    #[test]
    fn key_column_spellings_all_resolve() {
        for name in [
            "Nº do imóvel",
            "N° do imóvel",
            "N do imóvel",
            "No do imóvel",
            "N do imvel",
            "Numero do imovel",
            "Número do imóvel",
        ] {
            assert_eq!(map_column(name), Some(Attribute::ListingId), "{name}");
        }
    }

    #[test]
    fn other_columns_resolve_including_mangled_variants() {
        let cases = [
            ("Preço", Some(Attribute::Price)),
            ("Preo", Some(Attribute::Price)),
            ("Valor de avaliação", Some(Attribute::AppraisalValue)),
            ("Valor de avaliao", Some(Attribute::AppraisalValue)),
            ("Endereo", Some(Attribute::Address)),
            ("Descrio", Some(Attribute::Description)),
            ("Modalidade de venda", Some(Attribute::SaleModality)),
            ("Desconto", Some(Attribute::Discount)),
            (" uf ", Some(Attribute::Region)),
            ("Cidade", Some(Attribute::City)),
            ("Bairro", Some(Attribute::Neighborhood)),
            ("Link de acesso", Some(Attribute::AccessLink)),
            ("Observação", None),
        ];
        for (name, expected) in cases {
            assert_eq!(map_column(name), expected, "{name}");
        }
    }

    #[test]
    fn rule_order_decides_overlapping_names() {
        // Price is tried before appraisal value.
        assert_eq!(map_column("Valor de avaliacao preco"), Some(Attribute::Price));
        // A claimed key column whose guard fails is not handed to later rules.
        assert_eq!(map_column("preco"), Some(Attribute::Price));
        assert_eq!(map_column("imovel preco"), None);
        assert_eq!(map_column("Código do imovel"), None);
    }

    #[test]
    fn accented_descriptive_headers_reach_their_own_rules() {
        assert_eq!(map_column("Cidade do imóvel"), Some(Attribute::City));
        assert_eq!(map_column("Bairro do imóvel"), Some(Attribute::Neighborhood));
        assert_eq!(map_column("Descrição do imóvel"), Some(Attribute::Description));
        assert_eq!(map_column("Endereço do imóvel"), Some(Attribute::Address));
        assert_eq!(map_column("Nº do imóvel"), Some(Attribute::ListingId));

        let text = "Nº do imóvel;UF;Cidade do imóvel;Bairro do imóvel;Preço\n1;SP;SANTOS;GONZAGA;10\n";
        let records = normalize(text.as_bytes(), "SP", "a.csv").unwrap();
        let payload = &records[0].payload;
        assert_eq!(payload.city.as_deref(), Some("SANTOS"));
        assert_eq!(payload.neighborhood.as_deref(), Some("GONZAGA"));
        assert!(payload.extra.is_empty());
    }

    #[test]
    fn cells_are_trimmed_and_null_tokens_become_none() {
        let text = format!("{HEADER}\n 77 ;sp; nan ;None;;  ;1;2;3;4;5;\n");
        let records = normalize(text.as_bytes(), "SP", "a.csv").unwrap();
        let payload = &records[0].payload;
        assert_eq!(payload.city, None);
        assert_eq!(payload.neighborhood, None);
        assert_eq!(payload.address, None);
        assert_eq!(payload.price, None);
        assert_eq!(payload.appraisal_value.as_deref(), Some("1"));
        assert_eq!(payload.access_link.as_deref(), Some("5"));
    }

    #[test]
    fn control_characters_are_removed_from_cells() {
        assert_eq!(clean_cell("SAN\u{1f}TOS"), Some("SANTOS".to_string()));
        assert_eq!(clean_cell("\u{1f}\u{0}"), None);
        assert_eq!(clean_cell(" 10\t"), Some("10".to_string()));

        let text = format!("{HEADER}\n7;SP;A\u{1f}B;Y;Z;1;2;3;4;5;6;\n");
        let records = normalize(text.as_bytes(), "SP", "a.csv").unwrap();
        assert_eq!(records[0].payload.city.as_deref(), Some("AB"));
    }

    #[test]
    fn region_is_upper_cased_and_falls_back_to_hint() {
        let text = format!("{HEADER}\n1; rj ;X;Y;Z;1;2;3;4;5;6;\n2;;X;Y;Z;1;2;3;4;5;6;\n");
        let records = normalize(text.as_bytes(), "sp", "a.csv").unwrap();
        assert_eq!(records[0].key.region, "RJ");
        assert_eq!(records[1].key.region, "SP");

        let no_region = "Nº do imóvel;Cidade;Bairro;Preço\n1;X;Y;10\n";
        let out = normalize_artifact(no_region.as_bytes(), " geral ", "a.csv").unwrap();
        assert!(out.region_from_hint);
        assert_eq!(out.records[0].key.region, "GERAL");
        assert_eq!(out.records[0].payload.region.as_deref(), Some("GERAL"));

        let empty_region = "Nº do imóvel;UF;Cidade;Bairro\n1;;X;Y\n2;nan;X;Y\n";
        let out = normalize_artifact(empty_region.as_bytes(), "MG", "a.csv").unwrap();
        assert!(out.region_from_hint);
        assert!(out.records.iter().all(|r| r.key.region == "MG"));
    }

    #[test]
    fn listing_ids_lose_all_whitespace_and_empty_ids_are_dropped() {
        let text = format!(
            "{HEADER}\n 8444 4000\t01 ;SP;X;Y;Z;1;2;3;4;5;6;\n   ;SP;X;Y;Z;1;2;3;4;5;6;\nnan;SP;X;Y;Z;1;2;3;4;5;6;\n"
        );
        let out = normalize_artifact(text.as_bytes(), "SP", "a.csv").unwrap();
        assert_eq!(out.records.len(), 1);
        assert_eq!(out.records[0].key.listing_id, "8444400001");
        assert_eq!(out.dropped_without_id, 2);
    }

    #[test]
    fn duplicate_keys_keep_the_first_row() {
        let text = format!(
            "{HEADER}\n1;SP;X;Y;Z;100;2;3;4;5;6;\n1 ;SP;X;Y;Z;999;2;3;4;5;6;\n1;RJ;X;Y;Z;555;2;3;4;5;6;\n"
        );
        let out = normalize_artifact(text.as_bytes(), "SP", "a.csv").unwrap();
        assert_eq!(out.duplicates, 1);
        assert_eq!(out.records.len(), 2);
        assert_eq!(out.records[0].payload.price.as_deref(), Some("100"));
        assert_eq!(out.records[1].key, ListingKey::new("RJ", "1"));
    }

    #[test]
    fn blank_header_columns_are_dropped_and_unknown_columns_kept() {
        let text = "Nº do imóvel;UF;Cidade;;Observação;Bairro\n1;SP;X;junk;vista mar;Y\n";
        let out = normalize_artifact(text.as_bytes(), "SP", "a.csv").unwrap();
        assert_eq!(out.unmapped_columns, vec!["Observação"]);
        let payload = &out.records[0].payload;
        assert_eq!(payload.extra.get("Observação").map(String::as_str), Some("vista mar"));
        assert_eq!(payload.extra.len(), 1);
        assert_eq!(payload.neighborhood.as_deref(), Some("Y"));
    }

    #[test]
    fn short_rows_fill_missing_cells_with_none() {
        let text = format!("{HEADER}\n1;SP;X\n");
        let records = normalize(text.as_bytes(), "SP", "a.csv").unwrap();
        assert_eq!(records[0].payload.city.as_deref(), Some("X"));
        assert_eq!(records[0].payload.price, None);
    }

    #[test]
    fn header_only_export_yields_no_records() {
        let out = normalize_artifact(format!("{HEADER}\n").as_bytes(), "SP", "a.csv").unwrap();
        assert!(out.records.is_empty());
        assert_eq!(out.table_rows, 0);
    }
}
