use serde_json::Value;

pub const UNKNOWN: &str = "Unknown";
pub const NO_EMAIL: &str = "No email";

/// One candidate path through an Attio record's `values` object. Paths for a
/// field are tried in order and the first present result wins.
type FieldPath = fn(&Value) -> Option<String>;

/// How the `company` field of a person record resolves.
#[derive(Debug, Clone, PartialEq)]
pub enum CompanyField {
    /// Points at another record; the caller fetches it and reads its name.
    Reference { object: String, record_id: String },
    Inline(String),
    Absent,
}

fn first_entry<'a>(values: &'a Value, field: &str) -> Option<&'a Value> {
    values.get(field)?.get(0)
}

fn text(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn name_full(values: &Value) -> Option<String> {
    text(first_entry(values, "name")?.get("full_name"))
}

fn name_plain(values: &Value) -> Option<String> {
    text(first_entry(values, "name")?.get("value"))
}

fn email_address_list(values: &Value) -> Option<String> {
    text(first_entry(values, "email_addresses")?.get("email_address"))
}

fn primary_email_list(values: &Value) -> Option<String> {
    text(first_entry(values, "primary_email_addresses")?.get("email_address"))
}

fn first_present(values: &Value, paths: &[FieldPath]) -> Option<String> {
    paths.iter().find_map(|path| path(values))
}

pub fn display_name(values: &Value) -> Option<String> {
    first_present(values, &[name_full, name_plain])
}

pub fn display_email(values: &Value) -> Option<String> {
    first_present(values, &[email_address_list, primary_email_list])
}

pub fn company_field(values: &Value) -> CompanyField {
    let Some(entry) = first_entry(values, "company") else {
        return CompanyField::Absent;
    };

    if let Some(record_id) = text(entry.get("target_record_id")) {
        let object =
            text(entry.get("target_object")).unwrap_or_else(|| "companies".to_string());
        return CompanyField::Reference { object, record_id };
    }

    match text(entry.get("value")) {
        Some(value) => CompanyField::Inline(value),
        None => CompanyField::Absent,
    }
}
