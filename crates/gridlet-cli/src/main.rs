//! `gridlet` — drive a sheet from stdin, one command per line.
//!
//! Statements (`let A0 = 1 + B2`, `label A0 = title`) and commands
//! (`delete`, `undo`, `redo`, `width`, `precision`, `fit`, `get`, `print`,
//! `save`, `quit`). Each input line is one undo group followed by a
//! recalculation.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use gridlet_engine::Sheet;
use gridlet_model::{Pos, Range, Value};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "gridlet", version, about = "Terminal spreadsheet engine")]
struct Args {
    /// Sheet file to load at startup.
    path: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut sheet = match &args.path {
        Some(path) => Sheet::load_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Sheet::new(),
    };
    sheet.update();

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in stdin.lock().lines() {
        let line = line.context("reading command")?;
        match run_command(&mut sheet, line.trim(), args.path.as_deref(), &mut out) {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("error: {e:#}"),
        }
    }
    Ok(())
}

/// Execute one input line. Returns `false` to quit.
fn run_command(
    sheet: &mut Sheet,
    line: &str,
    default_path: Option<&Path>,
    out: &mut impl Write,
) -> Result<bool> {
    if line.is_empty() {
        return Ok(true);
    }
    let (command, rest) = line
        .split_once(char::is_whitespace)
        .unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "let" | "label" => {
            if !sheet.apply_statement(line) {
                bail!("bad statement: {line}");
            }
            sheet.end_undo_group();
            sheet.update();
        }
        "delete" => {
            let range: Range = rest.parse().with_context(|| format!("parsing {rest}"))?;
            if range.is_single() {
                sheet.delete(range.tl)?;
            } else {
                sheet.delete_in_range(range)?;
            }
            sheet.end_undo_group();
            sheet.update();
        }
        "undo" => {
            sheet.undo()?;
            sheet.update();
        }
        "redo" => {
            sheet.redo()?;
            sheet.update();
        }
        "width" => {
            let (col, adjust) = column_command(rest)?;
            match adjust {
                Adjust::Up => sheet.inc_width(col)?,
                Adjust::Down => sheet.dec_width(col)?,
                Adjust::To(n) => sheet.set_width(col, n)?,
                Adjust::Show => {
                    writeln!(out, "{}", sheet.column_at(col).width)?;
                    return Ok(true);
                }
            }
            sheet.end_undo_group();
        }
        "precision" => {
            let (col, adjust) = column_command(rest)?;
            match adjust {
                Adjust::Up => sheet.inc_precision(col)?,
                Adjust::Down => sheet.dec_precision(col)?,
                Adjust::To(n) => {
                    let n = u8::try_from(n).map_err(|_| anyhow!("precision too large"))?;
                    sheet.set_precision(col, n)?;
                }
                Adjust::Show => {
                    writeln!(out, "{}", sheet.column_at(col).precision)?;
                    return Ok(true);
                }
            }
            sheet.end_undo_group();
        }
        "fit" => {
            let col = Pos::parse_column(rest).map_err(|e| anyhow!("{e}: {rest}"))?;
            let precision = sheet.column_at(col).precision;
            let width = sheet.width_needed_for_column(col, precision, 80);
            sheet.set_width(col, width)?;
            sheet.end_undo_group();
        }
        "get" => {
            let pos: Pos = rest.parse().with_context(|| format!("parsing {rest}"))?;
            match sheet.cell_at(pos) {
                None => writeln!(out, "{pos} is empty")?,
                Some(cell) => writeln!(
                    out,
                    "{pos} = {}  [{}]",
                    cell.value(),
                    sheet.expr_text(pos).unwrap_or_default()
                )?,
            }
        }
        "print" => {
            for (pos, cell) in sheet.iter_cells() {
                let precision = sheet.column_at(pos.x).precision;
                match cell.value() {
                    Value::Number(n) => {
                        writeln!(out, "{pos} = {:.*}", precision as usize, n)?
                    }
                    other => writeln!(out, "{pos} = {other}")?,
                }
            }
        }
        "save" => {
            let path = if rest.is_empty() {
                default_path
                    .ok_or_else(|| anyhow!("no path: use `save <PATH>`"))?
                    .to_path_buf()
            } else {
                PathBuf::from(rest)
            };
            sheet
                .save_path(&path)
                .with_context(|| format!("saving {}", path.display()))?;
        }
        "quit" | "q" => return Ok(false),
        _ => bail!("unknown command: {command}"),
    }
    Ok(true)
}

enum Adjust {
    Up,
    Down,
    To(u16),
    Show,
}

/// Parse `<COL> [N|+|-]` for the width/precision commands.
fn column_command(rest: &str) -> Result<(u16, Adjust)> {
    let (col_text, arg) = rest
        .split_once(char::is_whitespace)
        .unwrap_or((rest, ""));
    let col = Pos::parse_column(col_text).map_err(|e| anyhow!("{e}: {col_text}"))?;
    let adjust = match arg.trim() {
        "" => Adjust::Show,
        "+" => Adjust::Up,
        "-" => Adjust::Down,
        n => Adjust::To(n.parse().with_context(|| format!("parsing {n}"))?),
    };
    Ok((col, adjust))
}
