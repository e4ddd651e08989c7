use anyhow::{anyhow, bail, Result};
use dialoguer::Confirm;

pub fn align_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

pub fn confirm_or_yes(yes: bool, prompt: &str) -> Result<()> {
    if yes {
        return Ok(());
    }
    let confirmed = Confirm::new()
        .with_prompt(prompt)
        .default(false)
        .interact()
        .map_err(|e| anyhow!("prompt failed: {e}"))?;
    if confirmed {
        Ok(())
    } else {
        bail!("aborted by user")
    }
}

pub fn format_fat_label(label: &str) -> Result<[u8; 11]> {
    let mut out = [b' '; 11];
    let upper = label.trim().to_ascii_uppercase();
    if upper.is_empty() {
        return Ok(out);
    }
    if upper.len() > 11 {
        bail!("FAT label too long (max 11 chars)");
    }
    for (i, b) in upper.bytes().enumerate() {
        out[i] = b;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_grain() {
        assert_eq!(align_up(0, 2048), 0);
        assert_eq!(align_up(1, 2048), 2048);
        assert_eq!(align_up(4096, 2048), 4096);
        assert_eq!(align_up(7, 0), 7);
    }

    #[test]
    fn fat_labels() {
        assert_eq!(&format_fat_label("boot").unwrap(), b"BOOT       ");
        assert_eq!(&format_fat_label("").unwrap(), b"           ");
        assert!(format_fat_label("much-too-long-label").is_err());
    }
}
