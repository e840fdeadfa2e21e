use std::fmt;

/// Cumulative experience required to reach each level from level 1,
/// indexed by level. Index 0 is unused padding so `LEVEL_EXP[level]`
/// reads naturally; the last playable level is 199 and index 200 closes
/// the final span.
pub const LEVEL_EXP: [u64; 201] = [
    0, 0, 15, 31, 48,
    67, 87, 109, 133, 159,
    187, 217, 249, 284, 322,
    363, 408, 456, 508, 565,
    626, 693, 765, 843, 927,
    1018, 1117, 1224, 1340, 1465,
    1601, 1748, 1907, 2079, 2265,
    2467, 2685, 2921, 3177, 3454,
    3753, 4077, 4427, 4806, 5216,
    5660, 6140, 6660, 7223, 7832,
    8491, 9204, 9975, 10809, 11712,
    12689, 13746, 14890, 16128, 17467,
    18916, 20484, 22181, 24017, 26003,
    28152, 30478, 32994, 35717, 38663,
    41851, 45300, 49032, 53070, 57439,
    62167, 67282, 72817, 78806, 85286,
    92297, 99883, 108091, 116972, 126582,
    136980, 148230, 160403, 173574, 187825,
    203245, 219929, 237981, 257514, 278648,
    301515, 326258, 353030, 381997, 413339,
    447251, 483944, 523646, 566604, 613084,
    663376, 717791, 776669, 840375, 909304,
    983886, 1064583, 1151898, 1246373, 1348595,
    1459199, 1578872, 1708359, 1848463, 2000056,
    2164080, 2341554, 2533581, 2741354, 2966164,
    3209409, 3472600, 3757373, 4065497, 4398887,
    4759615, 5149923, 5572236, 6029179, 6523591,
    7058545, 7637365, 8263649, 8941288, 9674493,
    10467821, 11326202, 12254971, 13259899, 14347231,
    15523724, 16796690, 18174039, 19664330, 21276825,
    23021545, 24909332, 26951918, 29161996, 31553300,
    34140691, 36940248, 39969369, 43246878, 46793143,
    50630201, 54781898, 59274034, 64134526, 69393578,
    75083872, 81240770, 87902534, 95110563, 102909650,
    111348262, 120478841, 130358127, 141047515, 152613433,
    165127756, 178668253, 193319071, 209171256, 226323321,
    244881855, 264962189, 286689110, 310197639, 335633867,
    363155866, 392934669, 425155334, 460018093, 497739598,
    538554267, 582715739, 630498452, 682199347, 738139716,
    798667195, 864157927, 935018899, 1011690471, 1094649112,
    1184410361,
];

/// Hours beyond this collapse to the capped sentinel instead of an
/// enormous number nobody can act on.
const DISPLAY_CEILING_HOURS: u64 = 999;

/// Estimated time until the next level-up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtaEstimate {
    /// Input out of range or rate unusable; rendered as a placeholder
    Unknown,
    /// More than the display ceiling away
    Capped,
    Time { hours: u64, minutes: u64 },
}

impl fmt::Display for EtaEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EtaEstimate::Unknown => write!(f, "-"),
            EtaEstimate::Capped => write!(f, "{}h+", DISPLAY_CEILING_HOURS),
            EtaEstimate::Time { hours, minutes } => write!(f, "{}h {}m", hours, minutes),
        }
    }
}

/// Predict time to the next level from the current position in the level
/// and the observed hourly rate. Pure function of its inputs; anything
/// the table cannot answer degrades to `Unknown`, never an error.
pub fn predict_level_up(
    level: Option<u32>,
    percentage: Option<f64>,
    exp_per_hour: f64,
) -> EtaEstimate {
    let level = match level {
        Some(l) if (1..=199).contains(&l) => l as usize,
        _ => return EtaEstimate::Unknown,
    };
    let percentage = match percentage {
        Some(p) if p.is_finite() => p.clamp(0.0, 100.0),
        _ => return EtaEstimate::Unknown,
    };
    if exp_per_hour <= 0.0 || !exp_per_hour.is_finite() {
        return EtaEstimate::Unknown;
    }

    let exp_span = LEVEL_EXP[level + 1].saturating_sub(LEVEL_EXP[level]);
    let exp_already_in_level = (exp_span as f64 * percentage / 100.0).floor() as u64;
    let exp_remaining = exp_span.saturating_sub(exp_already_in_level);

    let hours_needed = exp_remaining as f64 / exp_per_hour;
    if !hours_needed.is_finite() || hours_needed < 0.0 {
        return EtaEstimate::Unknown;
    }

    let hours = hours_needed.floor() as u64;
    if hours > DISPLAY_CEILING_HOURS {
        return EtaEstimate::Capped;
    }
    let minutes = ((hours_needed - hours as f64) * 60.0).floor() as u64;
    EtaEstimate::Time { hours, minutes }
}
