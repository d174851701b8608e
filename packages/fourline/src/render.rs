//! Plain-text rendering of a session for the terminal.

use std::fmt;

use fourline_session::{Board, PresenceSet, PresenceStatus, Role, SessionSnapshot};

/// Column header plus one line per row, `.` for empty cells.
pub struct BoardView<'a>(pub &'a Board);

impl fmt::Display for BoardView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let board = self.0;
        let header: Vec<String> = (1..=board.size()).map(|c| (c % 10).to_string()).collect();
        writeln!(f, "  {}", header.join(" "))?;
        for (i, row) in board.rows().enumerate() {
            let cells: Vec<String> = row.iter().map(|m| m.symbol().to_string()).collect();
            writeln!(f, "{} {}", (i + 1) % 10, cells.join(" "))?;
        }
        Ok(())
    }
}

pub struct PresenceLabel<'a>(pub &'a PresenceSet);

impl fmt::Display for PresenceLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.status() {
            PresenceStatus::Unknown => write!(f, "?"),
            PresenceStatus::Live => write!(f, "{}", self.0.count()),
            PresenceStatus::Stale => write!(f, "{} (stale)", self.0.count()),
        }
    }
}

/// One full screen of session state.
pub struct SessionScreen<'a> {
    pub snapshot: &'a SessionSnapshot,
    pub share_link: &'a str,
}

impl fmt::Display for SessionScreen<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snap = self.snapshot;
        let view = &snap.view;

        writeln!(f, "Joined: {}", PresenceLabel(view.presence()))?;
        if let Some(role) = snap.role {
            writeln!(f, "Playing as: {} ({})", role.player_code(), role.mark().symbol())?;
        }
        writeln!(f, "{}", turn_line(view.next(), snap.role))?;
        write!(f, "{}", BoardView(view.board()))?;
        if view.restart_eligible() {
            writeln!(f, "Board is full. Type `r` to reload the game.")?;
        }
        for notice in &snap.notices {
            writeln!(f, "! {}", notice.message)?;
        }
        writeln!(f, "Share: {}", self.share_link)
    }
}

fn turn_line(next: Option<Role>, me: Option<Role>) -> String {
    match (next, me) {
        (None, _) => "Next: unknown".to_string(),
        (Some(next), Some(me)) if next == me => "Next: you".to_string(),
        (Some(next), _) => format!("Next: player {}", next.player_code()),
    }
}
