/// Error code registry
///
/// Error codes are organized by category:
/// - 1000-1999: Configuration errors
/// - 2000-2999: Import resolution errors
/// - 3000-3999: Document parse errors
/// - 4000-4999: Validation errors
/// - 5000-5999: Job graph compile errors
/// - 6000-6999: Safe-outputs runtime errors
pub struct ErrorCode;

impl ErrorCode {
    // Configuration errors (1000-1999)
    pub const CONFIG_GENERIC: u16 = 1000;
    pub const CONFIG_NOT_FOUND: u16 = 1001;
    pub const CONFIG_PARSE_ERROR: u16 = 1002;
    pub const CONFIG_INVALID_VALUE: u16 = 1003;

    // Import resolution errors (2000-2999)
    pub const IMPORT_GENERIC: u16 = 2000;
    pub const IMPORT_NOT_FOUND: u16 = 2001;
    pub const IMPORT_FETCH_FAILED: u16 = 2002;
    pub const IMPORT_CYCLE: u16 = 2003;
    pub const IMPORT_INVALID_REFERENCE: u16 = 2004;
    pub const IMPORT_CACHE_WRITE: u16 = 2005;

    // Parse errors (3000-3999)
    pub const PARSE_GENERIC: u16 = 3000;
    pub const PARSE_UNTERMINATED_FRONTMATTER: u16 = 3001;
    pub const PARSE_INVALID_YAML: u16 = 3002;
    pub const PARSE_NOT_A_MAPPING: u16 = 3003;
    pub const PARSE_INVALID_DIRECTIVE: u16 = 3004;

    // Validation errors (4000-4999)
    pub const VALIDATION_FAILED: u16 = 4000;
    pub const VALIDATION_UNKNOWN_KEY: u16 = 4001;
    pub const VALIDATION_MISSING_FIELD: u16 = 4002;
    pub const VALIDATION_INVALID_VALUE: u16 = 4003;
    pub const VALIDATION_UNKNOWN_EFFECT_KIND: u16 = 4004;
    pub const VALIDATION_PERMISSION: u16 = 4005;
    pub const VALIDATION_SANDBOX: u16 = 4006;
    pub const VALIDATION_ENGINE: u16 = 4007;
    pub const VALIDATION_TRIGGER: u16 = 4008;
    pub const VALIDATION_NETWORK: u16 = 4009;
    pub const VALIDATION_TOOLS: u16 = 4010;

    // Compile errors (5000-5999)
    pub const COMPILE_GENERIC: u16 = 5000;
    pub const COMPILE_DUPLICATE_JOB: u16 = 5001;
    pub const COMPILE_MISSING_DEPENDENCY: u16 = 5002;
    pub const COMPILE_CYCLE: u16 = 5003;
    pub const COMPILE_GUARD_REFERENCE: u16 = 5004;
    pub const COMPILE_SERIALIZATION: u16 = 5005;
    pub const COMPILE_DRIFT: u16 = 5006;

    // Runtime errors (6000-6999)
    pub const RUNTIME_GENERIC: u16 = 6000;
    pub const RECORD_MALFORMED: u16 = 6001;
    pub const RECORD_UNKNOWN_KIND: u16 = 6002;
    pub const QUOTA_EXCEEDED: u16 = 6003;
    pub const LOG_UNPARSABLE: u16 = 6004;
    pub const LOG_IO: u16 = 6005;
    pub const BACKEND_FAILED: u16 = 6006;
    pub const VERDICT_MISSING: u16 = 6007;
    pub const DISALLOWED_VALUE: u16 = 6008;
}

/// Get a human-readable description for an error code
pub fn describe_error_code(code: u16) -> &'static str {
    match code {
        // Configuration errors
        1000 => "Generic configuration error",
        1001 => "Configuration file not found",
        1002 => "Failed to parse configuration",
        1003 => "Invalid value in configuration",

        // Import resolution errors
        2000 => "Generic import resolution error",
        2001 => "Imported document not found",
        2002 => "Fetching an imported document failed",
        2003 => "Import cycle detected",
        2004 => "Malformed import reference",
        2005 => "Writing the import cache failed",

        // Parse errors
        3000 => "Generic parse error",
        3001 => "Frontmatter block is not terminated",
        3002 => "Invalid YAML syntax in frontmatter",
        3003 => "Frontmatter is not a mapping",
        3004 => "Malformed body directive",

        // Validation errors
        4000 => "Workflow validation failed",
        4001 => "Unknown configuration key",
        4002 => "Required field is missing",
        4003 => "Invalid value",
        4004 => "Unknown safe-output effect kind",
        4005 => "Permission configuration error",
        4006 => "Sandbox configuration error",
        4007 => "Engine configuration error",
        4008 => "Trigger configuration error",
        4009 => "Network configuration error",
        4010 => "Tool configuration error",

        // Compile errors
        5000 => "Generic compile error",
        5001 => "Duplicate job name",
        5002 => "Job depends on an unknown job",
        5003 => "Job dependency cycle",
        5004 => "Job guard references a job outside its dependencies",
        5005 => "Pipeline serialization failed",
        5006 => "Compiled pipeline differs from the checked-in file",

        // Runtime errors
        6000 => "Generic safe-outputs runtime error",
        6001 => "Malformed effect request",
        6002 => "Unknown effect request type",
        6003 => "Effect quota exceeded",
        6004 => "Effect request log is unparsable",
        6005 => "Effect request log I/O failure",
        6006 => "Privileged backend call failed",
        6007 => "Threat detection verdict missing",
        6008 => "Value outside the declared allow-list",

        _ => "Unknown error code",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_ranges() {
        assert!((1000..2000).contains(&ErrorCode::CONFIG_NOT_FOUND));
        assert!((2000..3000).contains(&ErrorCode::IMPORT_CYCLE));
        assert!((3000..4000).contains(&ErrorCode::PARSE_INVALID_YAML));
        assert!((4000..5000).contains(&ErrorCode::VALIDATION_UNKNOWN_EFFECT_KIND));
        assert!((5000..6000).contains(&ErrorCode::COMPILE_CYCLE));
        assert!((6000..7000).contains(&ErrorCode::QUOTA_EXCEEDED));
    }

    #[test]
    fn test_describe_error_code() {
        assert_eq!(describe_error_code(2003), "Import cycle detected");
        assert_eq!(describe_error_code(4004), "Unknown safe-output effect kind");
        assert_eq!(describe_error_code(65535), "Unknown error code");
    }
}
