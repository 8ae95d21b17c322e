//! Job naming convention for worker units.
//!
//! Placement systems only accept DNS-label identifiers, so artifact file
//! names have to be reduced to `[a-z0-9-]` before they can name a job.

/// Prefix shared by every worker job name.
pub const JOB_NAME_PREFIX: &str = "yolo-job-";

/// Upper bound on a job name (RFC 1123 DNS label length).
pub const MAX_JOB_NAME_LEN: usize = 63;

/// Base used when nothing legal survives sanitization.
const FALLBACK_BASE: &str = "artifact";

/// Reduce an artifact reference to a placement-legal fragment.
///
/// Lowercases ASCII letters, replaces every other character outside
/// `[a-z0-9]` with `-`, collapses runs of `-` and trims them from both ends.
///
/// ```
/// use detector_core::naming::sanitize_artifact;
///
/// assert_eq!(sanitize_artifact("My Photo_01.JPG"), "my-photo-01-jpg");
/// assert_eq!(sanitize_artifact("__x__"), "x");
/// ```
pub fn sanitize_artifact(artifact_ref: &str) -> String {
    let mut out = String::with_capacity(artifact_ref.len());

    for c in artifact_ref.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }

    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Build the full job name for an artifact and a uniqueness suffix.
///
/// Convention: `yolo-job-{sanitized artifact}-{suffix}`. The artifact part
/// is truncated so the whole name never exceeds [`MAX_JOB_NAME_LEN`]; the
/// suffix is always kept intact.
///
/// ```
/// use detector_core::naming::job_name;
///
/// assert_eq!(job_name("My Photo_01.JPG", 42), "yolo-job-my-photo-01-jpg-42");
/// ```
pub fn job_name(artifact_ref: &str, suffix: u64) -> String {
    let suffix = suffix.to_string();
    let budget = MAX_JOB_NAME_LEN - JOB_NAME_PREFIX.len() - 1 - suffix.len();

    let mut base = sanitize_artifact(artifact_ref);
    base.truncate(budget);
    while base.ends_with('-') {
        base.pop();
    }
    if base.is_empty() {
        base.push_str(FALLBACK_BASE);
    }

    format!("{JOB_NAME_PREFIX}{base}-{suffix}")
}
