use serde_json::{Map, Value};

/// Fields every new product must carry, in the order they are reported missing.
const REQUIRED: [&str; 4] = ["title", "description", "price", "count"];

#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub title: String,
    pub description: String,
    pub price: f64,
    pub count: i64,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid product format")]
    NotAnObject,
    #[error("Invalid product data: {0} is missing!")]
    Missing(&'static str),
    #[error("Invalid product data: {0} should not be empty!")]
    Empty(&'static str),
    #[error("Invalid product data: {0} should be a number!")]
    NotANumber(&'static str),
    #[error("Invalid product data: price should be greater than 0!")]
    PriceNotPositive,
    #[error("Invalid product data: count should not be less than 0!")]
    CountNegative,
    #[error("Invalid product data: count should be a whole number!")]
    CountFractional,
}

/// Check a decoded request body. Numeric strings are accepted for `price`
/// and `count`.
pub fn validate_new_product(value: &Value) -> Result<NewProduct, ValidationError> {
    let obj = value.as_object().ok_or(ValidationError::NotAnObject)?;

    if let Some(field) = REQUIRED.iter().find(|f| !obj.contains_key(**f)) {
        return Err(ValidationError::Missing(*field));
    }

    let title = non_empty_text(obj, "title")?;
    let description = non_empty_text(obj, "description")?;

    let price = number(&obj["price"]).ok_or(ValidationError::NotANumber("price"))?;
    if price <= 0.0 {
        return Err(ValidationError::PriceNotPositive);
    }

    let count = number(&obj["count"]).ok_or(ValidationError::NotANumber("count"))?;
    if count < 0.0 {
        return Err(ValidationError::CountNegative);
    }
    if count.fract() != 0.0 {
        return Err(ValidationError::CountFractional);
    }

    Ok(NewProduct {
        title,
        description,
        price,
        count: count as i64,
    })
}

/// Falsy values (`null`, `false`, `0`, `""`) count as empty. Any other value
/// is kept in its textual form.
fn non_empty_text(obj: &Map<String, Value>, field: &'static str) -> Result<String, ValidationError> {
    match &obj[field] {
        Value::Null | Value::Bool(false) => Err(ValidationError::Empty(field)),
        Value::String(s) if s.is_empty() => Err(ValidationError::Empty(field)),
        Value::Number(n) if n.as_f64() == Some(0.0) => Err(ValidationError::Empty(field)),
        Value::String(s) => Ok(s.clone()),
        other => Ok(other.to_string()),
    }
}

/// Lenient numeric coercion: `null`, `false` and blank strings read as 0,
/// `true` as 1, other strings are parsed after trimming. Arrays and objects
/// are not numbers.
fn number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::Null | Value::Bool(false) => 0.0,
        Value::Bool(true) => 1.0,
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}
