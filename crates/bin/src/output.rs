//! Output formatting for the inspection commands.

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

/// Prints rows under a header with aligned columns.
///
/// Columns whose cells are all numbers are right-aligned. Cells past the
/// header count are ignored; nothing is printed for an empty table.
pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    if rows.is_empty() {
        return;
    }
    let widths: Vec<usize> = (0..headers.len())
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .map(String::len)
                .fold(headers[col].len(), usize::max)
        })
        .collect();
    let numeric: Vec<bool> = (0..headers.len())
        .map(|col| {
            rows.iter()
                .filter_map(|row| row.get(col))
                .all(|cell| cell.parse::<f64>().is_ok())
        })
        .collect();

    print_line(headers.iter().copied(), &widths, &numeric);
    for row in rows {
        print_line(row.iter().map(String::as_str), &widths, &numeric);
    }
}

fn print_line<'a>(cells: impl Iterator<Item = &'a str>, widths: &[usize], numeric: &[bool]) {
    let line: Vec<String> = cells
        .zip(widths.iter().zip(numeric))
        .map(|(cell, (&width, &right))| {
            if right {
                format!("{cell:>width$}")
            } else {
                format!("{cell:<width$}")
            }
        })
        .collect();
    println!("{}", line.join("  ").trim_end());
}
