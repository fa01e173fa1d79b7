use rand::Rng;

/// Random pleasant marble color as `#rrggbb`.
pub fn random_marble_color(rng: &mut impl Rng) -> String {
    let hue = rng.gen_range(0.0..360.0);
    format!("#{:06x}", hsv_to_rgb(hue, 0.55, 0.95))
}

/// Pulls a trailing `#rgb` or `#rrggbb` code out of a chat line.
pub fn trailing_hex_color(text: &str) -> Option<String> {
    let (_, code) = text.trim_end().rsplit_once('#')?;
    let valid = matches!(code.len(), 3 | 6) && code.chars().all(|c| c.is_ascii_hexdigit());
    valid.then(|| format!("#{}", code))
}

fn hsv_to_rgb(h: f64, s: f64, v: f64) -> u32 {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
        (c, x, 0.0)
    } else if h < 120.0 {
        (x, c, 0.0)
    } else if h < 180.0 {
        (0.0, c, x)
    } else if h < 240.0 {
        (0.0, x, c)
    } else if h < 300.0 {
        (x, 0.0, c)
    } else {
        (c, 0.0, x)
    };

    let ri = ((r + m) * 255.0).round() as u32;
    let gi = ((g + m) * 255.0).round() as u32;
    let bi = ((b + m) * 255.0).round() as u32;

    (ri << 16) | (gi << 8) | bi
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn random_colors_are_hex() {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        for _ in 0..100 {
            let color = random_marble_color(&mut rng);
            assert_eq!(color.len(), 7);
            assert!(color.starts_with('#'));
            assert!(color[1..].chars().all(|c| c.is_ascii_hexdigit()));
        }
    }

    #[test]
    fn parses_short_and_long_codes() {
        assert_eq!(trailing_hex_color("!marble #f0A"), Some("#f0A".to_string()));
        assert_eq!(
            trailing_hex_color("!marble #00ff99 "),
            Some("#00ff99".to_string())
        );
    }

    #[test]
    fn rejects_bad_codes() {
        assert_eq!(trailing_hex_color("!marble"), None);
        assert_eq!(trailing_hex_color("!marble #12345"), None);
        assert_eq!(trailing_hex_color("!marble #zzzzzz"), None);
        assert_eq!(trailing_hex_color("!marble #ff0000 please"), None);
    }
}
