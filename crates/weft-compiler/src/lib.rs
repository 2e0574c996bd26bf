//! # weft-compiler
//!
//! Turns a `.wefts` text spec into a `.weftb` binary model.
//!
//! The spec is line-oriented:
//!
//! ```text
//! # comment
//! node <id> <opcode> <in> <out> [flags] [deps <id,id,...>]
//! payload <hex-bytes>
//! iterate <var> <start> <end> {
//!     node <var> 0x01 0 0
//! }
//! ```
//!
//! Numbers accept decimal or `0x` hex. `iterate` expands its block once
//! per value, substituting whole tokens equal to `<var>`. The payload is
//! the concatenation of all `payload` directives, zero-padded to a
//! 32-byte boundary.
//!
//! Compilation validates the graph (ids, references, offsets, acyclicity),
//! reorders nodes topologically so the emitted file is
//! execution-friendly, and emits the narrowest binary variant that can
//! represent the graph.

use std::path::Path;

use weft_core::{align_up_32, Result, WeftError};
use weft_model::{Graph, Node, Topology};

/// Parse a `.wefts` spec into a graph. No validation beyond syntax.
pub fn parse_spec(src: &str) -> Result<Graph> {
    let lines: Vec<&str> = src.lines().collect();
    let mut graph = Graph::default();

    let mut i = 0;
    while i < lines.len() {
        let line = lines[i].trim();
        if line.is_empty() || line.starts_with('#') {
            i += 1;
            continue;
        }

        let fields: Vec<&str> = line.split_whitespace().collect();
        match fields[0] {
            "iterate" => {
                i = parse_iterate(&lines, i, &fields, &mut graph)?;
            }
            _ => {
                parse_directive(line, i + 1, &mut graph)?;
                i += 1;
            }
        }
    }

    graph.payload.resize(align_up_32(graph.payload.len()), 0);
    Ok(graph)
}

/// Parse, validate, topologically sort, and serialize a spec.
pub fn compile_str(src: &str) -> Result<Vec<u8>> {
    let mut graph = parse_spec(src)?;
    graph.validate()?;
    graph.sort_topological()?;
    let variant = weft_model::preferred_variant(&graph);
    tracing::debug!(
        nodes = graph.node_count(),
        payload = graph.payload.len(),
        ?variant,
        "spec compiled"
    );
    weft_model::write(&graph, variant)
}

/// Compile `input` and write the binary to `output`.
pub fn compile(input: &Path, output: &Path) -> Result<()> {
    let src = std::fs::read_to_string(input)?;
    let bytes = compile_str(&src)?;
    std::fs::write(output, &bytes)?;
    tracing::info!(
        "compiled {} -> {} ({} bytes)",
        input.display(),
        output.display(),
        bytes.len()
    );
    Ok(())
}

fn parse_directive(line: &str, line_no: usize, graph: &mut Graph) -> Result<()> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    match fields[0] {
        "node" => {
            let node = parse_node(&fields, line_no)?;
            graph.nodes.push(node);
            Ok(())
        }
        "payload" => {
            if fields.len() < 2 {
                return Err(parse_err(line_no, "payload directive missing data"));
            }
            let data = parse_hex(fields[1], line_no)?;
            graph.payload.extend_from_slice(&data);
            Ok(())
        }
        other => Err(parse_err(line_no, format!("unknown directive {:?}", other))),
    }
}

fn parse_node(fields: &[&str], line_no: usize) -> Result<Node> {
    if fields.len() < 5 {
        return Err(parse_err(
            line_no,
            "node directive needs <id> <opcode> <in> <out>",
        ));
    }

    let id = parse_int(fields[1], line_no, "id")? as u16;
    let opcode = parse_int(fields[2], line_no, "opcode")? as u8;
    let in_off = parse_int(fields[3], line_no, "in offset")? as u16;
    let out_off = parse_int(fields[4], line_no, "out offset")? as u16;

    let mut flags = 0u32;
    let mut topology = Topology::new();
    let mut rest = &fields[5..];
    if let Some(&first) = rest.first() {
        if first != "deps" {
            flags = parse_int(first, line_no, "flags")? as u32;
            rest = &rest[1..];
        }
    }
    if let Some(&first) = rest.first() {
        if first != "deps" {
            return Err(parse_err(line_no, format!("unexpected token {:?}", first)));
        }
        let Some(list) = rest.get(1) else {
            return Err(parse_err(line_no, "deps keyword without a dependency list"));
        };
        for part in list.split(',') {
            topology.push(parse_int(part, line_no, "dependency id")? as u16);
        }
    }

    Ok(Node { id, opcode, in_off, out_off, flags, topology })
}

fn parse_iterate(
    lines: &[&str],
    start: usize,
    fields: &[&str],
    graph: &mut Graph,
) -> Result<usize> {
    if fields.len() < 4 {
        return Err(parse_err(
            start + 1,
            "iterate directive needs <var> <start> <end>",
        ));
    }
    let var = fields[1];
    let from = parse_int(fields[2], start + 1, "iterate start")? as i64;
    let to = parse_int(fields[3], start + 1, "iterate end")? as i64;

    // Opening brace: either trailing on the iterate line or alone on the
    // next non-blank line.
    let mut body_start = start + 1;
    if fields.last() != Some(&"{") {
        while body_start < lines.len() && lines[body_start].trim().is_empty() {
            body_start += 1;
        }
        if body_start >= lines.len() || lines[body_start].trim() != "{" {
            return Err(parse_err(start + 1, "missing '{' after iterate"));
        }
        body_start += 1;
    }

    let mut body = Vec::new();
    let mut i = body_start;
    loop {
        if i >= lines.len() {
            return Err(parse_err(start + 1, "unterminated iterate block"));
        }
        let line = lines[i].trim();
        if line == "}" {
            break;
        }
        if !line.is_empty() && !line.starts_with('#') {
            body.push((line, i + 1));
        }
        i += 1;
    }

    for value in from..=to {
        for &(line, line_no) in &body {
            let expanded = substitute(line, var, value);
            parse_directive(&expanded, line_no, graph)?;
        }
    }

    Ok(i + 1)
}

/// Replace whole tokens equal to `var` with `value`.
fn substitute(line: &str, var: &str, value: i64) -> String {
    line.split_whitespace()
        .map(|tok| {
            if tok == var {
                value.to_string()
            } else {
                // Comma-separated dependency lists get per-element
                // substitution too.
                tok.split(',')
                    .map(|p| if p == var { value.to_string() } else { p.to_string() })
                    .collect::<Vec<_>>()
                    .join(",")
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_int(token: &str, line_no: usize, what: &str) -> Result<u64> {
    let parsed = if let Some(hex) = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
    } else {
        token.parse::<u64>()
    };
    parsed.map_err(|_| parse_err(line_no, format!("invalid {} {:?}", what, token)))
}

fn parse_hex(token: &str, line_no: usize) -> Result<Vec<u8>> {
    if token.len() % 2 != 0 {
        return Err(parse_err(line_no, "payload hex has odd length"));
    }
    (0..token.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&token[i..i + 2], 16)
                .map_err(|_| parse_err(line_no, format!("invalid payload hex {:?}", token)))
        })
        .collect()
}

fn parse_err(line: usize, message: impl Into<String>) -> WeftError {
    WeftError::Parse { line, message: message.into() }
}
