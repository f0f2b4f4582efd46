use gridlet_engine::Sheet;
use gridlet_model::{Column, Pos, Value};
use pretty_assertions::assert_eq;

fn number(sheet: &Sheet, addr: &str) -> f64 {
    sheet
        .value_at(addr.parse().unwrap())
        .and_then(Value::as_number)
        .unwrap_or_else(|| panic!("no number at {addr}"))
}

fn range_sum_sheet() -> Sheet {
    let mut sheet = Sheet::new();
    for (i, v) in [1, 2, 3, 4, 5].into_iter().enumerate() {
        sheet.apply_statement(&format!("let A{i} = {v}"));
    }
    sheet.apply_statement("let B0 = @sum(A0:A4)");
    sheet.end_undo_group();
    sheet.update();
    sheet
}

/// Everything `undo` is supposed to restore, captured through the public
/// surface.
fn snapshot(sheet: &Sheet) -> (Vec<(Pos, Value, String)>, Vec<Column>) {
    let cells = sheet
        .iter_cells()
        .map(|(p, c)| (p, c.value().clone(), sheet.expr_text(p).unwrap()))
        .collect();
    let columns = (0..8).map(|c| sheet.column_at(c)).collect();
    (cells, columns)
}

#[test]
fn deleting_a_summand_and_undoing_it_round_trips() {
    let mut sheet = range_sum_sheet();
    assert_eq!(number(&sheet, "B0"), 15.0);

    sheet.delete("A2".parse().unwrap()).unwrap();
    sheet.end_undo_group();
    sheet.update();
    assert_eq!(number(&sheet, "B0"), 12.0);
    assert!(sheet.cell_at("A2".parse().unwrap()).is_none());

    sheet.undo().unwrap();
    sheet.update();
    assert_eq!(number(&sheet, "A2"), 3.0);
    assert_eq!(number(&sheet, "B0"), 15.0);
    sheet.verify_integrity();
}

#[test]
fn delete_restores_dependents_after_edit() {
    // The literal scenario: with A2 = 30 the sum is 43; deleting A2 drops
    // it to 13 and undo brings 43 back.
    let mut sheet = range_sum_sheet();
    sheet.apply_statement("let A2 = 30");
    sheet.end_undo_group();
    sheet.update();
    assert_eq!(number(&sheet, "B0"), 43.0);

    sheet.delete("A2".parse().unwrap()).unwrap();
    sheet.end_undo_group();
    sheet.update();
    assert_eq!(number(&sheet, "B0"), 13.0);

    sheet.undo().unwrap();
    sheet.update();
    assert_eq!(number(&sheet, "A2"), 30.0);
    assert_eq!(number(&sheet, "B0"), 43.0);
}

#[test]
fn undo_then_redo_is_the_identity() {
    let mut sheet = range_sum_sheet();
    sheet.apply_statement("let A2 = 30");
    sheet.end_undo_group();
    sheet.set_width(0, 14).unwrap();
    sheet.end_undo_group();
    sheet.update();
    let reference = snapshot(&sheet);

    sheet.undo().unwrap();
    sheet.undo().unwrap();
    sheet.update();
    assert_ne!(snapshot(&sheet), reference);

    sheet.redo().unwrap();
    sheet.redo().unwrap();
    sheet.update();
    assert_eq!(snapshot(&sheet), reference);
    sheet.verify_integrity();
}

#[test]
fn range_delete_undoes_as_one_group() {
    let mut sheet = range_sum_sheet();
    sheet.delete_in_range("A0:A4".parse().unwrap()).unwrap();
    sheet.end_undo_group();
    sheet.update();
    assert_eq!(sheet.cell_count(), 1, "only the sum cell is left");

    sheet.undo().unwrap();
    sheet.update();
    assert_eq!(sheet.cell_count(), 6);
    assert_eq!(number(&sheet, "B0"), 15.0);
    sheet.verify_integrity();
}

#[test]
fn replacing_an_expression_restores_the_old_one_on_undo() {
    let mut sheet = Sheet::new();
    sheet.apply_statement("let A0 = 1 + 1");
    sheet.end_undo_group();
    sheet.apply_statement("let A0 = 40 + 2");
    sheet.end_undo_group();
    sheet.update();
    assert_eq!(number(&sheet, "A0"), 42.0);

    sheet.undo().unwrap();
    sheet.update();
    assert_eq!(number(&sheet, "A0"), 2.0);
    assert_eq!(
        sheet.expr_text("A0".parse().unwrap()).unwrap(),
        "1 + 1"
    );
}

#[test]
fn column_metadata_changes_are_reversible() {
    let mut sheet = Sheet::new();
    sheet.set_width(2, 20).unwrap();
    sheet.inc_precision(2).unwrap();
    sheet.end_undo_group();
    assert_eq!(sheet.column_at(2).width, 20);
    assert_eq!(sheet.column_at(2).precision, 3);

    sheet.undo().unwrap();
    assert_eq!(sheet.column_at(2).width, Column::DEFAULT_WIDTH);
    assert_eq!(sheet.column_at(2).precision, Column::DEFAULT_PRECISION);

    sheet.redo().unwrap();
    assert_eq!(sheet.column_at(2).width, 20);
    assert_eq!(sheet.column_at(2).precision, 3);
}

#[test]
fn undo_on_an_empty_log_is_a_no_op() {
    let mut sheet = Sheet::new();
    sheet.undo().unwrap();
    sheet.redo().unwrap();
    assert_eq!(sheet.cell_count(), 0);
}

#[test]
fn a_fresh_edit_discards_the_redo_log() {
    let mut sheet = Sheet::new();
    sheet.apply_statement("let A0 = 1");
    sheet.end_undo_group();
    sheet.undo().unwrap();
    sheet.update();
    assert_eq!(sheet.cell_count(), 0);

    sheet.apply_statement("let B0 = 2");
    sheet.end_undo_group();
    sheet.redo().unwrap();
    sheet.update();

    // The redo of "insert A0" is gone; only B0 exists.
    assert!(sheet.cell_at("A0".parse().unwrap()).is_none());
    assert_eq!(number(&sheet, "B0"), 2.0);
}

#[test]
fn interleaved_undo_redo_keeps_groups_aligned() {
    let mut sheet = Sheet::new();
    for i in 0..3 {
        sheet.apply_statement(&format!("let A{i} = {i}"));
        sheet.end_undo_group();
    }
    sheet.update();
    assert_eq!(sheet.cell_count(), 3);

    sheet.undo().unwrap();
    sheet.undo().unwrap();
    sheet.update();
    assert_eq!(sheet.cell_count(), 1);

    sheet.redo().unwrap();
    sheet.update();
    assert_eq!(sheet.cell_count(), 2);
    assert_eq!(number(&sheet, "A1"), 1.0);

    sheet.redo().unwrap();
    sheet.update();
    assert_eq!(sheet.cell_count(), 3);
    sheet.verify_integrity();
}
