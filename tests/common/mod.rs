//! Shared helpers for integration tests.

/// Minimal PDF with one page per entry of `pages`, each page a list of text
/// lines, and an Info `Title` when `title` is given.
/// Builds body then xref with correct byte offsets so pdf-extract can parse it.
pub fn minimal_pdf(pages: &[&[&str]], title: Option<&str>) -> Vec<u8> {
    build_pdf(pages, title, "")
}

/// Like [`minimal_pdf`], with the font's `/Encoding` set to `encoding`.
#[allow(dead_code)]
pub fn pdf_with_font_encoding(pages: &[&[&str]], encoding: &str) -> Vec<u8> {
    build_pdf(pages, None, &format!(" /Encoding /{}", encoding))
}

fn build_pdf(pages: &[&[&str]], title: Option<&str>, font_extra: &str) -> Vec<u8> {
    let page_count = pages.len();
    let font_id = 3 + 2 * page_count;
    let mut offsets = Vec::new();
    let mut out = Vec::new();
    out.extend_from_slice(b"%PDF-1.4\n");

    offsets.push(out.len());
    out.extend_from_slice(b"1 0 obj << /Type /Catalog /Pages 2 0 R >> endobj\n");

    let kids: Vec<String> = (0..page_count).map(|i| format!("{} 0 R", 3 + 2 * i)).collect();
    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "2 0 obj << /Type /Pages /Kids [{}] /Count {} >> endobj\n",
            kids.join(" "),
            page_count
        )
        .as_bytes(),
    );

    for (i, lines) in pages.iter().enumerate() {
        let page_id = 3 + 2 * i;
        let content: String = lines
            .iter()
            .enumerate()
            .map(|(n, line)| format!("BT /F1 12 Tf 72 {} Td ({}) Tj ET\n", 720 - 24 * n, line))
            .collect();

        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Type /Page /Parent 2 0 R /MediaBox [0 0 612 792] /Contents {} 0 R /Resources << /Font << /F1 {} 0 R >> >> >> endobj\n",
                page_id,
                page_id + 1,
                font_id
            )
            .as_bytes(),
        );
        offsets.push(out.len());
        out.extend_from_slice(
            format!(
                "{} 0 obj << /Length {} >> stream\n{}endstream endobj\n",
                page_id + 1,
                content.len(),
                content
            )
            .as_bytes(),
        );
    }

    offsets.push(out.len());
    out.extend_from_slice(
        format!(
            "{} 0 obj << /Type /Font /Subtype /Type1 /BaseFont /Helvetica{} >> endobj\n",
            font_id, font_extra
        )
        .as_bytes(),
    );

    let info_id = font_id + 1;
    if let Some(title) = title {
        offsets.push(out.len());
        out.extend_from_slice(
            format!("{} 0 obj << /Title ({}) >> endobj\n", info_id, title).as_bytes(),
        );
    }
    let info = if title.is_some() {
        format!(" /Info {} 0 R", info_id)
    } else {
        String::new()
    };

    let xref_start = out.len();
    out.extend_from_slice(format!("xref\n0 {}\n", offsets.len() + 1).as_bytes());
    out.extend_from_slice(format!("{:010} 65535 f \n", 0).as_bytes());
    for offset in &offsets {
        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
    }
    out.extend_from_slice(
        format!(
            "trailer << /Size {} /Root 1 0 R{} >>\nstartxref\n{}\n%%EOF\n",
            offsets.len() + 1,
            info,
            xref_start
        )
        .as_bytes(),
    );
    out
}
