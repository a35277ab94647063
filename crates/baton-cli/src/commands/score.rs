use baton_core::reliability_score;
use clap::Args;

#[derive(Args)]
pub struct ScoreCommand {
    /// Turns assigned
    pub assigned: u64,
    /// Turns taken
    pub taken: u64,
    /// Turns timed out
    pub timeouts: u64,
}

pub fn handle_score_command(cmd: ScoreCommand) {
    match reliability_score(cmd.assigned, cmd.taken, cmd.timeouts) {
        Some(score) => println!("{score}"),
        None => println!("no score"),
    }
}
