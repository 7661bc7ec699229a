use anyhow::Result;
use serde::Serialize;

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    if headers.is_empty() {
        println!("(no columns)");
        return;
    }
    for line in table_lines(headers, rows) {
        println!("{line}");
    }
}

/// Markdown-style table. Columns whose cells are all numbers are right-aligned,
/// so money amounts line up on the decimal point.
fn table_lines(headers: &[&str], rows: &[Vec<String>]) -> Vec<String> {
    let columns: Vec<(usize, bool)> = headers
        .iter()
        .enumerate()
        .map(|(i, header)| {
            let cells = rows.iter().filter_map(|row| row.get(i));
            let width = cells
                .clone()
                .map(|c| c.chars().count())
                .fold(header.chars().count(), usize::max);
            let numeric = !rows.is_empty() && cells.clone().all(|c| c.parse::<f64>().is_ok());
            (width, numeric)
        })
        .collect();

    let render = |cells: &[&str]| {
        let body: Vec<String> = columns
            .iter()
            .enumerate()
            .map(|(i, &(width, numeric))| {
                let cell = cells.get(i).copied().unwrap_or("");
                if numeric {
                    format!(" {cell:>width$} ")
                } else {
                    format!(" {cell:<width$} ")
                }
            })
            .collect();
        format!("|{}|", body.join("|"))
    };

    let mut lines = vec![render(headers)];
    let rule: Vec<String> = columns
        .iter()
        .map(|&(width, numeric)| {
            let dashes = "-".repeat(width + 1);
            if numeric { format!("{dashes}:") } else { format!("{dashes}-") }
        })
        .collect();
    lines.push(format!("|{}|", rule.join("|")));
    for row in rows {
        let cells: Vec<&str> = row.iter().map(String::as_str).collect();
        lines.push(render(&cells));
    }
    lines
}

/// Two decimals for terminal tables; JSON output keeps full precision.
pub fn money(amount: f64) -> String {
    format!("{amount:.2}")
}
