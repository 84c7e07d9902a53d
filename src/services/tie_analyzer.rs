//! Tie detection and elimination cut analysis over team scores.
//!
//! Everything here is pure: callers load the teams and decide what to do with
//! the reports. Eliminated teams never take part in ties or rankings.

use std::cmp::Ordering;

use indexmap::IndexMap;

use crate::{
    dao::models::TeamEntity,
    dto::admin::{
        CheckScoreResponse, EliminationReportView, RankedTeamView, TieGroupView, TieMember,
    },
};

/// Teams sharing the exact same score.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TieGroup {
    pub score: i64,
    /// At least two teams, ordered by name then id.
    pub teams: Vec<TeamEntity>,
}

/// Team with its competition rank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedTeam {
    pub rank: u32,
    pub team: TeamEntity,
}

/// Outcome of an elimination analysis. Nothing is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EliminationReport {
    pub cutoff_round: String,
    pub keep: usize,
    /// Score of the last kept place; `None` when every team fits.
    pub threshold_score: Option<i64>,
    pub ranked: Vec<RankedTeam>,
    /// Teams strictly below the threshold.
    pub candidates: Vec<RankedTeam>,
    /// Teams on the threshold score that straddle the cut.
    pub boundary_tie: Option<TieGroup>,
}

/// Standings order: score descending, then name, then id.
pub fn standings_order(a: &TeamEntity, b: &TeamEntity) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
}

/// Competition ranking ("1224") of the given teams in standings order.
pub fn rank_teams<'a, I>(teams: I) -> Vec<RankedTeam>
where
    I: IntoIterator<Item = &'a TeamEntity>,
{
    let mut sorted: Vec<&TeamEntity> = teams.into_iter().collect();
    sorted.sort_by(|a, b| standings_order(a, b));

    let mut ranked = Vec::with_capacity(sorted.len());
    let mut rank = 0;
    let mut previous = None;
    for (index, team) in sorted.into_iter().enumerate() {
        if previous != Some(team.score) {
            rank = index as u32 + 1;
            previous = Some(team.score);
        }
        ranked.push(RankedTeam {
            rank,
            team: team.clone(),
        });
    }
    ranked
}

/// Groups of at least two active teams with identical scores, best score first.
pub fn find_ties(teams: &[TeamEntity], division: Option<&str>) -> Vec<TieGroup> {
    let mut contenders: Vec<&TeamEntity> = teams
        .iter()
        .filter(|team| !team.eliminated)
        .filter(|team| division.is_none_or(|wanted| team.division.as_deref() == Some(wanted)))
        .collect();
    contenders.sort_by(|a, b| standings_order(a, b));

    contenders
        .chunk_by(|a, b| a.score == b.score)
        .filter(|group| group.len() >= 2)
        .map(|group| TieGroup {
            score: group[0].score,
            teams: group.iter().map(|team| (*team).clone()).collect(),
        })
        .collect()
}

/// Ties computed separately inside each division, divisions in name order.
///
/// Teams without a division are not part of any division.
pub fn find_division_ties(teams: &[TeamEntity]) -> IndexMap<String, Vec<TieGroup>> {
    let mut divisions: Vec<&str> = teams
        .iter()
        .filter_map(|team| team.division.as_deref())
        .collect();
    divisions.sort_unstable();
    divisions.dedup();

    divisions
        .into_iter()
        .map(|division| (division.to_owned(), find_ties(teams, Some(division))))
        .collect()
}

/// Rank the active teams and work out who falls below the `keep` cut.
pub fn run_elimination(teams: &[TeamEntity], cutoff_round: &str, keep: usize) -> EliminationReport {
    let ranked = rank_teams(teams.iter().filter(|team| !team.eliminated));

    let threshold_score = match keep {
        0 => None,
        _ if ranked.len() > keep => Some(ranked[keep - 1].team.score),
        _ => None,
    };

    let (candidates, boundary_tie) = match threshold_score {
        Some(threshold) => {
            let candidates: Vec<RankedTeam> = ranked
                .iter()
                .filter(|entry| entry.team.score < threshold)
                .cloned()
                .collect();
            let on_threshold: Vec<TeamEntity> = ranked
                .iter()
                .filter(|entry| entry.team.score == threshold)
                .map(|entry| entry.team.clone())
                .collect();
            let kept_without_tie = ranked.len() - candidates.len();
            let boundary_tie = (kept_without_tie > keep && on_threshold.len() >= 2).then(|| {
                TieGroup {
                    score: threshold,
                    teams: on_threshold,
                }
            });
            (candidates, boundary_tie)
        }
        None => (Vec::new(), None),
    };

    EliminationReport {
        cutoff_round: cutoff_round.to_owned(),
        keep,
        threshold_score,
        ranked,
        candidates,
        boundary_tie,
    }
}

impl From<&TieGroup> for TieGroupView {
    fn from(group: &TieGroup) -> Self {
        Self {
            score: group.score,
            teams: group
                .teams
                .iter()
                .map(|team| TieMember {
                    id: team.id,
                    name: team.name.clone(),
                })
                .collect(),
        }
    }
}

impl From<&[TieGroup]> for CheckScoreResponse {
    fn from(groups: &[TieGroup]) -> Self {
        Self {
            has_ties: !groups.is_empty(),
            count: groups.len(),
            ties: groups.iter().map(TieGroupView::from).collect(),
        }
    }
}

impl From<&RankedTeam> for RankedTeamView {
    fn from(entry: &RankedTeam) -> Self {
        Self {
            rank: entry.rank,
            id: entry.team.id,
            name: entry.team.name.clone(),
            score: entry.team.score,
        }
    }
}

impl From<&EliminationReport> for EliminationReportView {
    fn from(report: &EliminationReport) -> Self {
        Self {
            cutoff_round: report.cutoff_round.clone(),
            keep: report.keep,
            threshold_score: report.threshold_score,
            ranked: report.ranked.iter().map(RankedTeamView::from).collect(),
            candidates: report.candidates.iter().map(RankedTeamView::from).collect(),
            boundary_tie: report.boundary_tie.as_ref().map(TieGroupView::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng, rngs::StdRng};
    use uuid::Uuid;

    use super::*;

    fn team(name: &str, score: i64) -> TeamEntity {
        TeamEntity {
            id: Uuid::new_v4(),
            name: name.into(),
            score,
            streak: 0,
            division: None,
            eliminated: false,
            eliminated_after_round: None,
            joined_at: 0,
        }
    }

    fn in_division(mut team: TeamEntity, division: &str) -> TeamEntity {
        team.division = Some(division.into());
        team
    }

    fn names(group: &TieGroup) -> Vec<&str> {
        group.teams.iter().map(|team| team.name.as_str()).collect()
    }

    #[test]
    fn ten_ten_seven_is_one_tie() {
        let teams = vec![team("team2", 10), team("team1", 10), team("team3", 7)];
        let ties = find_ties(&teams, None);
        assert_eq!(ties.len(), 1);
        assert_eq!(ties[0].score, 10);
        assert_eq!(names(&ties[0]), ["team1", "team2"]);
    }

    #[test]
    fn unique_scores_have_no_ties() {
        let teams = vec![team("a", 3), team("b", 2), team("c", 1)];
        assert!(find_ties(&teams, None).is_empty());
        assert!(find_ties(&[], None).is_empty());
    }

    #[test]
    fn eliminated_teams_do_not_tie() {
        let mut out = team("out", 5);
        out.eliminated = true;
        let teams = vec![team("in", 5), out];
        assert!(find_ties(&teams, None).is_empty());
    }

    #[test]
    fn ties_are_scoped_to_divisions() {
        let teams = vec![
            in_division(team("a", 4), "north"),
            in_division(team("b", 4), "south"),
            in_division(team("c", 4), "south"),
            team("d", 4),
        ];

        let south = find_ties(&teams, Some("south"));
        assert_eq!(south.len(), 1);
        assert_eq!(names(&south[0]), ["b", "c"]);

        let per_division = find_division_ties(&teams);
        assert_eq!(
            per_division.keys().collect::<Vec<_>>(),
            ["north", "south"]
        );
        assert!(per_division["north"].is_empty());
        assert_eq!(per_division["south"].len(), 1);

        // Across the whole field all four share the score.
        assert_eq!(find_ties(&teams, None)[0].teams.len(), 4);
    }

    #[test]
    fn tie_groups_are_ordered_by_score() {
        let teams = vec![
            team("a", 1),
            team("b", 1),
            team("c", 9),
            team("d", 9),
            team("e", 5),
        ];
        let scores: Vec<i64> = find_ties(&teams, None).iter().map(|g| g.score).collect();
        assert_eq!(scores, [9, 1]);
    }

    #[test]
    fn random_tie_groups_are_sound() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..200 {
            let teams: Vec<TeamEntity> = (0..rng.random_range(0..12))
                .map(|i| team(&format!("t{i}"), rng.random_range(0..6)))
                .collect();
            let ties = find_ties(&teams, None);
            for group in &ties {
                assert!(group.teams.len() >= 2);
                assert!(group.teams.iter().all(|team| team.score == group.score));
                let holders = teams.iter().filter(|t| t.score == group.score).count();
                assert_eq!(holders, group.teams.len());
            }
            for candidate in &teams {
                let sharing = teams.iter().filter(|t| t.score == candidate.score).count();
                let grouped = ties.iter().any(|g| g.score == candidate.score);
                assert_eq!(sharing >= 2, grouped);
            }
        }
    }

    #[test]
    fn competition_ranking_shares_places() {
        let teams = vec![team("a", 10), team("b", 10), team("c", 7), team("d", 3)];
        let ranks: Vec<u32> = rank_teams(&teams).iter().map(|r| r.rank).collect();
        assert_eq!(ranks, [1, 1, 3, 4]);
    }

    #[test]
    fn elimination_lists_teams_below_threshold() {
        let teams = vec![team("a", 10), team("b", 8), team("c", 6), team("d", 2)];
        let report = run_elimination(&teams, "R1", 2);
        assert_eq!(report.threshold_score, Some(8));
        let candidates: Vec<&str> = report
            .candidates
            .iter()
            .map(|entry| entry.team.name.as_str())
            .collect();
        assert_eq!(candidates, ["c", "d"]);
        assert_eq!(report.boundary_tie, None);
    }

    #[test]
    fn elimination_reports_boundary_tie() {
        let teams = vec![team("a", 10), team("b", 7), team("c", 7), team("d", 1)];
        let report = run_elimination(&teams, "R2", 2);
        assert_eq!(report.threshold_score, Some(7));
        assert_eq!(report.candidates.len(), 1);
        let tie = report.boundary_tie.unwrap();
        assert_eq!(tie.score, 7);
        assert_eq!(names(&tie), ["b", "c"]);
    }

    #[test]
    fn tie_inside_the_kept_places_is_not_a_boundary_tie() {
        let teams = vec![team("a", 10), team("b", 10), team("c", 3)];
        let report = run_elimination(&teams, "R1", 2);
        assert_eq!(report.threshold_score, Some(10));
        assert_eq!(report.boundary_tie, None);
        assert_eq!(report.candidates.len(), 1);
    }

    #[test]
    fn keeping_everyone_eliminates_nobody() {
        let teams = vec![team("a", 1), team("b", 1)];
        let report = run_elimination(&teams, "R1", 5);
        assert_eq!(report.threshold_score, None);
        assert!(report.candidates.is_empty());
        assert_eq!(report.ranked.len(), 2);
    }
}
