//! Line-oriented review loop over stdin/stdout.
//!
//! The loop is a plain driver of the core contract: peek the head pair,
//! print its diff, read a verdict, submit. Undo is available whenever a
//! review has been completed; quitting just stops — every submit already
//! persisted, so the session resumes where it left off.

use std::io::{self, BufRead, Write};

use anyhow::Context;
use pairview_core::{SessionManager, SessionPhase, Verdict};

/// Diff lines printed per pair before the display is cut short. The full
/// diff always goes to the report regardless.
const MAX_DISPLAY_LINES: usize = 400;

pub fn run_review_loop(manager: &mut SessionManager) -> anyhow::Result<()> {
    let stdin = io::stdin();
    let mut input = stdin.lock();

    loop {
        match manager.phase() {
            SessionPhase::Reviewing => {}
            SessionPhase::Completed => break,
            other => anyhow::bail!("session is not reviewable (phase: {})", other.name()),
        }
        let Some(pair) = manager.next() else {
            break;
        };
        let identifier = pair.identifier.clone();
        let has_expected = pair.expected_code.is_some();

        let progress = manager.progress().context("active session")?;
        println!();
        println!("=== [{}/{}] {} ===", progress.completed_count + 1, progress.total_count, identifier);
        if !has_expected {
            println!("(no expected code for this item; every line shows as added)");
        }
        match manager.current_diff()? {
            Some(diff) if diff.unified.is_empty() => {
                println!("(expected and generated code are identical)")
            }
            Some(diff) => {
                if diff.summarized {
                    println!("(large input: showing summarized diff)");
                }
                for (count, line) in diff.unified.lines().enumerate() {
                    if count >= MAX_DISPLAY_LINES {
                        println!("... (diff truncated for display; the report keeps it in full)");
                        break;
                    }
                    println!("{line}");
                }
            }
            None => break,
        }

        print!("[s]uccess [f]ail-no-change [i]nvalid [w]rong-vuln [p]artial [c]ustom [u]ndo [q]uit > ");
        io::stdout().flush()?;
        let Some(choice) = read_line(&mut input)? else {
            break; // stdin closed
        };

        let verdict = match choice.trim().chars().next() {
            Some('s') => Verdict::Success,
            Some('f') => Verdict::FailureNoChange,
            Some('i') => Verdict::InvalidCode,
            Some('w') => Verdict::WrongVulnerability,
            Some('p') => Verdict::PartialSuccess,
            Some('c') => {
                let label = ask(&mut input, "custom verdict label > ")?;
                if label.is_empty() {
                    eprintln!("empty label, review not recorded");
                    continue;
                }
                Verdict::Custom(label)
            }
            Some('u') => {
                if manager.undo()? {
                    println!("last review undone");
                } else {
                    println!("nothing to undo");
                }
                continue;
            }
            Some('q') => {
                if let Some(session_id) = manager.session_id() {
                    println!("progress saved; resume with `pairview resume {session_id}`");
                }
                return Ok(());
            }
            _ => {
                println!("unrecognized choice");
                continue;
            }
        };

        let comment = ask(&mut input, "comment (enter to skip) > ")?;
        // A failed submit rolls the engine back, so the same pair is
        // simply offered again on the next turn of the loop.
        match manager.submit(verdict, &comment) {
            Ok(result) => println!(
                "recorded review #{} for {}",
                result.review_id, result.source_identifier
            ),
            Err(err) => eprintln!("review not recorded ({err}); try again"),
        }
    }

    // Queue drained: close out the report.
    let report = manager.finalize()?;
    match report {
        Some(path) => println!("all pairs reviewed; report written to {}", path.display()),
        None => println!("all pairs reviewed"),
    }
    Ok(())
}

/// Yes/no confirmation on stderr-driven flows (corrupted snapshots).
pub fn confirm(question: &str) -> anyhow::Result<bool> {
    print!("{question} [y/N] > ");
    io::stdout().flush()?;
    let stdin = io::stdin();
    let mut input = stdin.lock();
    Ok(read_line(&mut input)?
        .map(|line| matches!(line.trim(), "y" | "Y" | "yes"))
        .unwrap_or(false))
}

fn ask(input: &mut impl BufRead, question: &str) -> anyhow::Result<String> {
    print!("{question}");
    io::stdout().flush()?;
    Ok(read_line(input)?.unwrap_or_default().trim().to_owned())
}

/// One line from stdin; `None` on EOF.
fn read_line(input: &mut impl BufRead) -> anyhow::Result<Option<String>> {
    let mut line = String::new();
    let read = input.read_line(&mut line)?;
    if read == 0 {
        Ok(None)
    } else {
        Ok(Some(line))
    }
}
