//! Map name normalization
//!
//! The game refers to each location by several internal identifiers: scene
//! bundle names, day/night variants, and difficulty tiers. Everything the
//! tracker stores uses one canonical key per physical map.
//!
//! | Key | Aliases |
//! |-----|---------|
//! | `Customs` | `bigmap`, `customs` |
//! | `Factory` | `factory4_day`, `factory4_night`, `factory` |
//! | `Woods` | `woods` |
//! | `Shoreline` | `shoreline` |
//! | `Interchange` | `interchange`, `shopping_mall` |
//! | `Reserve` | `rezervbase`, `reserve` |
//! | `Lighthouse` | `lighthouse` |
//! | `Labs` | `laboratory`, `lab`, `labs` |
//! | `Streets` | `tarkovstreets`, `city`, `streets` |
//! | `GroundZero` | `sandbox`, `sandbox_high`, `sandbox_start`, `groundzero` |
//! | `Labyrinth` | `labyrinth` |

/// Every canonical map key, in display order.
pub const MAP_KEYS: [&str; 11] = [
    "Customs",
    "Factory",
    "Woods",
    "Shoreline",
    "Interchange",
    "Reserve",
    "Lighthouse",
    "Labs",
    "Streets",
    "GroundZero",
    "Labyrinth",
];

/// Canonical key for a known map identifier (case-insensitive).
pub fn canonical_key(identifier: &str) -> Option<&'static str> {
    let key = match identifier.trim().to_ascii_lowercase().as_str() {
        "bigmap" | "customs" => "Customs",
        "factory4_day" | "factory4_night" | "factory" => "Factory",
        "woods" => "Woods",
        "shoreline" => "Shoreline",
        "interchange" | "shopping_mall" => "Interchange",
        "rezervbase" | "reservebase" | "reserve" => "Reserve",
        "lighthouse" => "Lighthouse",
        "laboratory" | "lab" | "labs" => "Labs",
        "tarkovstreets" | "city" | "streets" => "Streets",
        "sandbox" | "sandbox_high" | "sandbox_start" | "sandbox_high_start" | "groundzero" => {
            "GroundZero"
        }
        "labyrinth" => "Labyrinth",
        _ => return None,
    };
    Some(key)
}

/// Normalize a map identifier, returning the input unchanged when unknown.
pub fn normalize(identifier: &str) -> String {
    canonical_key(identifier)
        .map(str::to_string)
        .unwrap_or_else(|| identifier.trim().to_string())
}

/// Human-readable name for a canonical key (falls back to the key itself).
pub fn display_name(key: &str) -> &str {
    match key {
        "Customs" => "Customs",
        "Factory" => "Factory",
        "Woods" => "Woods",
        "Shoreline" => "Shoreline",
        "Interchange" => "Interchange",
        "Reserve" => "Reserve",
        "Lighthouse" => "Lighthouse",
        "Labs" => "The Lab",
        "Streets" => "Streets of Tarkov",
        "GroundZero" => "Ground Zero",
        "Labyrinth" => "The Labyrinth",
        other => other,
    }
}
