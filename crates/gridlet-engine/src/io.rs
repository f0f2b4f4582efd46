//! Line-oriented persistence: one `let`/`label` statement per line, cells
//! emitted in canonical row-major order. Loading is permissive; lines that
//! fail to parse are skipped.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use crate::expr::{parse_expr, parse_label};
use crate::sheet::Sheet;

impl Sheet {
    /// Apply one statement (`let <POS> = <EXPR>` or `label <POS> = <TEXT>`).
    ///
    /// Returns `false` when the line is not a well-formed statement; blank
    /// lines are accepted and do nothing.
    pub fn apply_statement(&mut self, line: &str) -> bool {
        let line = line.trim_start();
        if line.trim().is_empty() {
            return true;
        }
        let Some((keyword, rest)) = line.split_once(char::is_whitespace) else {
            return false;
        };
        let Some((lhs, rhs)) = rest.split_once('=') else {
            return false;
        };
        let Ok(pos) = lhs.trim().parse() else {
            return false;
        };

        let parsed = match keyword {
            "let" => match parse_expr(rhs) {
                Ok(parsed) => parsed,
                Err(_) => return false,
            },
            // The label body is raw text: strip the single space the writer
            // puts after `=`, keep everything else verbatim.
            "label" => parse_label(rhs.strip_prefix(' ').unwrap_or(rhs).trim_end()),
            _ => return false,
        };
        self.insert(pos, parsed).is_ok()
    }

    /// Write every cell as a statement line.
    pub fn save_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for (pos, cell) in self.iter_cells() {
            let pool = self.pool_at(pos);
            if cell.expr().is_literal_text() {
                writeln!(w, "label {pos} = {pool}")?;
            } else {
                writeln!(w, "let {pos} = {}", cell.expr().display(pool))?;
            }
        }
        Ok(())
    }

    /// Save to `path`, clearing the has-changes flag on success.
    pub fn save_path(&mut self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        self.save_to(&mut w)?;
        w.flush()?;
        self.mark_saved();
        tracing::debug!(path = %path.display(), cells = self.cell_count(), "saved");
        Ok(())
    }

    /// Build a sheet from statement lines. Unparsable lines are skipped.
    /// The result has a clean history and no pending changes; the caller
    /// decides when to run `update`.
    pub fn load_from<R: BufRead>(reader: R) -> io::Result<Sheet> {
        let mut sheet = Sheet::new();
        let mut skipped = 0usize;
        for line in reader.lines() {
            if !sheet.apply_statement(&line?) {
                skipped += 1;
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "ignored unparsable lines");
        }
        sheet.reset_history();
        sheet.mark_saved();
        Ok(sheet)
    }

    pub fn load_path(path: &Path) -> io::Result<Sheet> {
        let sheet = Self::load_from(BufReader::new(File::open(path)?))?;
        tracing::debug!(path = %path.display(), cells = sheet.cell_count(), "loaded");
        Ok(sheet)
    }
}

#[cfg(test)]
mod tests {
    use gridlet_model::Value;
    use pretty_assertions::assert_eq;

    use super::*;

    fn load(text: &str) -> Sheet {
        Sheet::load_from(text.as_bytes()).unwrap()
    }

    #[test]
    fn load_save_round_trip() {
        // Already in canonical row-major order, so saving reproduces it.
        let input = "\
let A0 = 1
label B0 = totals
let A1 = A0 + 1
let B1 = @sum(A0:A1)
";
        let mut sheet = load(input);
        sheet.update();

        let mut out = Vec::new();
        sheet.save_to(&mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), input);
    }

    #[test]
    fn load_skips_bad_lines() {
        let sheet = load("let A0 = 1\nnonsense\nlet = 2\nlet B0 = )(\n\nlet A1 = 2\n");
        assert_eq!(sheet.cell_count(), 2);
        assert!(!sheet.has_changes());
    }

    #[test]
    fn label_text_survives_round_trip() {
        let mut sheet = load("label A0 = spaced   out = text\n");
        sheet.update();
        assert_eq!(
            sheet.value_at("A0".parse().unwrap()),
            Some(&Value::Text("spaced   out = text".to_string()))
        );

        let mut out = Vec::new();
        sheet.save_to(&mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "label A0 = spaced   out = text\n"
        );
    }

    #[test]
    fn save_path_clears_change_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sheet.gl");

        let mut sheet = Sheet::new();
        assert!(sheet.apply_statement("let A0 = 41 + 1"));
        sheet.end_undo_group();
        sheet.update();
        assert!(sheet.has_changes());

        sheet.save_path(&path).unwrap();
        assert!(!sheet.has_changes());

        let mut reloaded = Sheet::load_path(&path).unwrap();
        reloaded.update();
        assert_eq!(
            reloaded.value_at("A0".parse().unwrap()),
            Some(&Value::Number(42.0))
        );
    }
}
