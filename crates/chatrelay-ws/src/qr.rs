//! Terminal rendering of pairing challenges.
//!
//! Uses Unicode half-block characters so two QR rows fit in one terminal
//! row, which keeps the code roughly square in a typical terminal font.

use qrcode::{Color, QrCode};

/// Modules of light border around the code.
const QUIET_ZONE: usize = 2;

/// Render `data` as terminal lines, or `None` if it cannot be encoded.
pub fn render_lines(data: &str) -> Option<Vec<String>> {
    let code = QrCode::new(data.as_bytes()).ok()?;
    let colors = code.to_colors();
    let size = code.width();
    let total = size + QUIET_ZONE * 2;

    let dark = |x: usize, y: usize| -> bool {
        if x < QUIET_ZONE || y < QUIET_ZONE {
            return false;
        }
        let (qx, qy) = (x - QUIET_ZONE, y - QUIET_ZONE);
        qx < size && qy < size && colors[qy * size + qx] == Color::Dark
    };

    let lines = (0..total.div_ceil(2))
        .map(|row| {
            let (upper_y, lower_y) = (row * 2, row * 2 + 1);
            (0..total)
                .map(|x| match (dark(x, upper_y), lower_y < total && dark(x, lower_y)) {
                    (true, true) => '█',
                    (true, false) => '▀',
                    (false, true) => '▄',
                    (false, false) => ' ',
                })
                .collect()
        })
        .collect();

    Some(lines)
}

/// Render `data` as one printable block.
pub fn render(data: &str) -> Option<String> {
    render_lines(data).map(|lines| lines.join("\n"))
}
