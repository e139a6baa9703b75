//! Locations the card can be pointed at.

use crate::error::ValidationError;

/// Location used when nothing has been saved yet.
pub const DEFAULT_LOCATION: &str = "臺北市";

/// Every name accepted by the location form. The forecast dataset is keyed by
/// these, and the bundled sunrise/sunset table carries a block for each.
pub const SUPPORTED_LOCATIONS: &[&str] = &[
    "中和",
    "新北市",
    "嘉義市",
    "新竹縣",
    "新竹市",
    "臺北市",
    "臺南市",
    "宜蘭縣",
    "苗栗縣",
    "雲林縣",
    "花蓮縣",
    "臺中市",
    "臺東縣",
    "桃園市",
    "南投縣",
    "高雄市",
    "金門縣",
    "屏東縣",
    "基隆市",
    "澎湖縣",
    "彰化縣",
    "連江縣",
];

pub fn is_supported(name: &str) -> bool {
    SUPPORTED_LOCATIONS.contains(&name)
}

/// Accept a user-entered location, trimming surrounding whitespace.
pub fn validate_location(input: &str) -> Result<String, ValidationError> {
    let name = input.trim();
    if is_supported(name) {
        Ok(name.to_string())
    } else {
        Err(ValidationError::UnsupportedLocation(input.to_string()))
    }
}
