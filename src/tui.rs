use std::io::{self, BufRead, Stdout, Write};
use std::time::Duration;

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::Line;
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};

use crate::app::StudyPlan;
use crate::error::RetrieverError;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

type Screen = Terminal<CrosstermBackend<Stdout>>;

/// Raw mode, and optionally the alternate screen, held until drop.
struct TerminalGuard {
    alternate: bool,
}

impl TerminalGuard {
    fn raw() -> miette::Result<Self> {
        enable_raw_mode().into_diagnostic()?;
        Ok(Self { alternate: false })
    }

    fn alternate() -> miette::Result<Self> {
        let mut guard = Self::raw()?;
        io::stdout().execute(EnterAlternateScreen).into_diagnostic()?;
        guard.alternate = true;
        Ok(guard)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        disable_raw_mode().ok();
        if self.alternate {
            io::stdout().execute(LeaveAlternateScreen).ok();
        }
    }
}

fn enter_screen() -> miette::Result<(Screen, TerminalGuard)> {
    let guard = TerminalGuard::alternate()?;
    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = Terminal::new(backend).into_diagnostic()?;
    terminal.clear().into_diagnostic()?;
    Ok((terminal, guard))
}

fn next_key() -> miette::Result<Option<KeyEvent>> {
    if event::poll(POLL_INTERVAL).into_diagnostic()? {
        if let Event::Key(key) = event::read().into_diagnostic()? {
            if key.kind == KeyEventKind::Press {
                return Ok(Some(key));
            }
        }
    }
    Ok(None)
}

fn is_interrupt(key: &KeyEvent) -> bool {
    key.modifiers.contains(KeyModifiers::CONTROL) && key.code == KeyCode::Char('c')
}

/// Reads one line from stdin after printing `label` on stderr.
pub fn prompt_line(label: &str) -> miette::Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{label}").into_diagnostic()?;
    stderr.flush().into_diagnostic()?;
    let mut line = String::new();
    let read = io::stdin().lock().read_line(&mut line).into_diagnostic()?;
    if read == 0 {
        return Err(miette::Report::new(RetrieverError::Cancelled));
    }
    Ok(line.trim().to_string())
}

/// Reads a password in raw mode, echoing `*` per character.
pub fn prompt_password(label: &str) -> miette::Result<String> {
    let mut stderr = io::stderr();
    write!(stderr, "{label}").into_diagnostic()?;
    stderr.flush().into_diagnostic()?;

    let guard = TerminalGuard::raw()?;
    let mut password = String::new();
    let outcome = loop {
        let key = match next_key() {
            Ok(Some(key)) => key,
            Ok(None) => continue,
            Err(err) => break Err(err),
        };
        if is_interrupt(&key) {
            break Err(miette::Report::new(RetrieverError::Cancelled));
        }
        match key.code {
            KeyCode::Enter => break Ok(()),
            KeyCode::Esc => break Err(miette::Report::new(RetrieverError::Cancelled)),
            KeyCode::Backspace => {
                if password.pop().is_some() {
                    write!(stderr, "\x08 \x08").ok();
                }
            }
            KeyCode::Char(c) => {
                password.push(c);
                write!(stderr, "*").ok();
            }
            _ => {}
        }
        stderr.flush().ok();
    };
    drop(guard);
    writeln!(stderr).ok();
    outcome.map(|()| password)
}

pub fn confirm(title: &str, lines: &[String]) -> miette::Result<bool> {
    let (mut terminal, _guard) = enter_screen()?;

    let confirmed = loop {
        terminal
            .draw(|frame| {
                let block = Block::default()
                    .borders(Borders::ALL)
                    .title(title.to_string());
                let mut text: Vec<Line> = lines.iter().map(|line| Line::from(line.clone())).collect();
                text.push(Line::from(""));
                text.push(Line::from("Press y to confirm, n to cancel."));
                let paragraph = Paragraph::new(text)
                    .alignment(Alignment::Center)
                    .wrap(Wrap { trim: true })
                    .block(block);
                frame.render_widget(paragraph, frame.area());
            })
            .into_diagnostic()?;

        if let Some(key) = next_key()? {
            if is_interrupt(&key) {
                break false;
            }
            match key.code {
                KeyCode::Char('y') | KeyCode::Char('Y') => break true,
                KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => break false,
                _ => {}
            }
        }
    };

    Ok(confirmed)
}

/// One checklist line per candidate study.
pub fn review_row(plan: &StudyPlan) -> String {
    let study = &plan.study;
    format!(
        "{:<14} {:<12} {:<8} {:<40} {} series / {} images",
        study.accession_number.as_deref().unwrap_or("-"),
        study.patient_id.as_deref().unwrap_or("-"),
        study.study_date.as_deref().unwrap_or("-"),
        study.description.as_deref().unwrap_or(""),
        plan.series.len(),
        plan.instance_count()
    )
}

/// Checklist over the candidate studies, all selected initially.
///
/// Returns the selection flags in plan order, or `None` when cancelled.
pub fn review_studies(plans: &[StudyPlan]) -> miette::Result<Option<Vec<bool>>> {
    if plans.is_empty() {
        return Ok(Some(Vec::new()));
    }
    let rows: Vec<String> = plans.iter().map(review_row).collect();
    let mut selected = vec![true; plans.len()];
    let mut state = ListState::default();
    state.select(Some(0));

    let (mut terminal, _guard) = enter_screen()?;
    let decision = loop {
        terminal
            .draw(|frame| {
                let chunks = Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([Constraint::Min(3), Constraint::Length(3)])
                    .split(frame.area());

                let items: Vec<ListItem> = rows
                    .iter()
                    .zip(&selected)
                    .map(|(row, on)| {
                        let mark = if *on { "[x]" } else { "[ ]" };
                        ListItem::new(format!("{mark} {row}"))
                    })
                    .collect();
                let count = selected.iter().filter(|on| **on).count();
                let list = List::new(items)
                    .block(
                        Block::default()
                            .borders(Borders::ALL)
                            .title(format!("Review studies ({count}/{} selected)", rows.len())),
                    )
                    .highlight_style(
                        Style::default()
                            .fg(Color::Cyan)
                            .add_modifier(Modifier::BOLD),
                    )
                    .highlight_symbol("> ");
                frame.render_stateful_widget(list, chunks[0], &mut state);

                let help = Paragraph::new(Line::from(
                    "space toggle  a toggle all  enter download selected  esc cancel",
                ))
                .block(Block::default().borders(Borders::ALL));
                frame.render_widget(help, chunks[1]);
            })
            .into_diagnostic()?;

        let Some(key) = next_key()? else {
            continue;
        };
        if is_interrupt(&key) {
            break None;
        }
        let current = state.selected().unwrap_or(0);
        match key.code {
            KeyCode::Up | KeyCode::Char('k') => state.select(Some(current.saturating_sub(1))),
            KeyCode::Down | KeyCode::Char('j') => {
                state.select(Some((current + 1).min(rows.len() - 1)))
            }
            KeyCode::Char(' ') => selected[current] = !selected[current],
            KeyCode::Char('a') => {
                let all = selected.iter().all(|on| *on);
                selected.iter_mut().for_each(|on| *on = !all);
            }
            KeyCode::Enter => break Some(selected.clone()),
            KeyCode::Esc | KeyCode::Char('q') => break None,
            _ => {}
        }
    };

    Ok(decision)
}
