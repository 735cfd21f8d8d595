/// Mask a secret for logs and status output.
///
/// Values of 8 or more characters keep their last 4 characters for operator
/// correlation; shorter values are fully masked. Never returns the input.
pub fn mask_secret(secret: &str) -> String {
    let chars = secret.chars().count();
    if chars >= 8 {
        let tail: String = secret
            .chars()
            .skip(chars - 4)
            .collect();
        format!("***{tail}")
    } else {
        "***".to_string()
    }
}
