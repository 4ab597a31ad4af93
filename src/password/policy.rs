/// Password complexity rules shared by registration, reset, and change flows
///
/// Hard requirements block submission; pattern warnings and the strength score
/// are advisory only and never block on their own.

const MIN_LENGTH: usize = 8;
const MAX_LENGTH: usize = 128;

/// Symbols accepted for the symbol-class requirement
const SYMBOLS: &str = "!@#$%^&*()_+-=[]{}|;:'\",.<>?/~`\\";

/// Common passwords rejected outright (case-insensitive exact match)
const DENYLIST: &[&str] = &[
    "password",
    "password1",
    "password123",
    "12345678",
    "123456789",
    "1234567890",
    "qwerty123",
    "letmein",
    "welcome1",
    "admin123",
    "iloveyou",
    "sunshine",
    "princess",
    "football",
    "baseball",
    "monkey123",
    "dragon123",
    "trustno1",
    "master123",
    "shadow123",
    "superman",
    "qwertyuiop",
];

/// Keyboard rows checked for adjacency patterns
const KEYBOARD_ROWS: &[&str] = &["qwertyuiop", "asdfghjkl", "zxcvbnm", "1234567890"];

/// Result of validating a candidate password
#[derive(Debug, Clone)]
pub struct PasswordCheck {
    /// True when every hard requirement passed
    pub valid: bool,
    /// Hard rule violations; joined into the user-facing message
    pub errors: Vec<String>,
    /// Non-blocking pattern findings
    pub warnings: Vec<String>,
    /// Advisory strength score, 0 to 6
    pub score: u8,
}

impl PasswordCheck {
    /// Joined rule-violation message for error responses
    pub fn message(&self) -> String {
        self.errors.join("; ")
    }
}

/// Validate a candidate password against the full rule set
pub fn validate_password(password: &str) -> PasswordCheck {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let length = password.chars().count();
    if length < MIN_LENGTH {
        errors.push(format!(
            "Password must be at least {} characters",
            MIN_LENGTH
        ));
    }
    if length > MAX_LENGTH {
        errors.push(format!("Password must be at most {} characters", MAX_LENGTH));
    }

    let has_upper = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lower = password.chars().any(|c| c.is_ascii_lowercase());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_symbol = password.chars().any(|c| SYMBOLS.contains(c));

    if !has_upper {
        errors.push("Password must contain an uppercase letter".to_string());
    }
    if !has_lower {
        errors.push("Password must contain a lowercase letter".to_string());
    }
    if !has_digit {
        errors.push("Password must contain a digit".to_string());
    }
    if !has_symbol {
        errors.push("Password must contain a symbol".to_string());
    }

    let lowered = password.to_lowercase();
    if DENYLIST.contains(&lowered.as_str()) {
        errors.push("Password is too common".to_string());
    }

    if has_sequential_run(&lowered) {
        warnings.push("Avoid sequential characters".to_string());
    }
    if has_repeated_run(password) {
        warnings.push("Avoid repeated characters".to_string());
    }
    if has_keyboard_run(&lowered) {
        warnings.push("Avoid keyboard patterns".to_string());
    }

    let class_count =
        [has_upper, has_lower, has_digit, has_symbol].iter().filter(|b| **b).count() as u8;
    let length_points = match length {
        0..=7 => 0,
        8..=11 => 1,
        12..=15 => 2,
        _ => 3,
    };
    let score = (length_points + class_count.min(3)).min(6);

    PasswordCheck {
        valid: errors.is_empty(),
        errors,
        warnings,
        score,
    }
}

/// Three or more consecutively ascending characters (abc, 123)
fn has_sequential_run(lowered: &str) -> bool {
    let bytes: Vec<u8> = lowered.bytes().collect();
    bytes.windows(3).any(|w| {
        w[0].is_ascii_alphanumeric() && w[1] == w[0].wrapping_add(1) && w[2] == w[1].wrapping_add(1)
    })
}

/// Three or more of the same character in a row
fn has_repeated_run(password: &str) -> bool {
    let chars: Vec<char> = password.chars().collect();
    chars.windows(3).any(|w| w[0] == w[1] && w[1] == w[2])
}

/// A run of four or more adjacent keys from a keyboard row
fn has_keyboard_run(lowered: &str) -> bool {
    for row in KEYBOARD_ROWS {
        for start in 0..row.len().saturating_sub(3) {
            let run = &row[start..start + 4];
            if lowered.contains(run) {
                return true;
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_strong_password() {
        let check = validate_password("Str0ng!Pass");
        assert!(check.valid, "errors: {:?}", check.errors);
        assert!(check.score >= 4);
    }

    #[test]
    fn test_rejects_common_password() {
        let check = validate_password("password");
        assert!(!check.valid);
        assert!(check.errors.iter().any(|e| e.contains("too common")));
    }

    #[test]
    fn test_rejects_short_password() {
        let check = validate_password("Aa1!");
        assert!(!check.valid);
        assert!(check.errors.iter().any(|e| e.contains("at least 8")));
    }

    #[test]
    fn test_rejects_overlong_password() {
        let long = format!("Aa1!{}", "x".repeat(130));
        let check = validate_password(&long);
        assert!(!check.valid);
        assert!(check.errors.iter().any(|e| e.contains("at most 128")));
    }

    #[test]
    fn test_reports_missing_classes() {
        let check = validate_password("alllowercase");
        assert!(!check.valid);
        assert!(check.errors.iter().any(|e| e.contains("uppercase")));
        assert!(check.errors.iter().any(|e| e.contains("digit")));
        assert!(check.errors.iter().any(|e| e.contains("symbol")));
    }

    #[test]
    fn test_denylist_is_case_insensitive() {
        assert!(!validate_password("PaSsWoRd").valid);
    }

    #[test]
    fn test_warnings_do_not_block() {
        // Contains "123" sequential and "aaa" repeated but meets hard rules
        let check = validate_password("Aaa123!xyzQ");
        assert!(check.valid);
        assert!(!check.warnings.is_empty());
    }

    #[test]
    fn test_keyboard_pattern_warning() {
        let check = validate_password("Qwerty!9zz");
        assert!(check.valid);
        assert!(check
            .warnings
            .iter()
            .any(|w| w.contains("keyboard")));
    }

    #[test]
    fn test_score_tiers() {
        let short = validate_password("Aa1!aaaa");
        let long = validate_password("Aa1!aaaaaaaaaaaaaaaa");
        assert!(long.score > short.score);
        assert!(long.score <= 6);
    }
}
