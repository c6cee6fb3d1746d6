//! Fair sharing of device throughput among operations with individual ceilings.

/// Distributes `capacity` among consumers with the given throughput ceilings.
///
/// Every consumer first gets the fair share `capacity / n`. Consumers whose ceiling is below the fair share get
/// their ceiling and the difference goes to the leftover pool. Consumers whose ceiling is above the fair share are
/// capped by it and become candidates for the leftover, which is then handed out in a single pass ordered by
/// ascending unmet demand: each candidate receives the smaller of its unmet demand and an equal split of what is left
/// among the remaining candidates.
///
/// Returns allocations in the order of `ceilings`. Negative and NaN ceilings are treated as zero.
pub fn share_throughput(capacity: f64, ceilings: &[f64]) -> Vec<f64> {
    if ceilings.is_empty() {
        return Vec::new();
    }
    let fair_share = capacity / ceilings.len() as f64;
    let mut allocations = vec![0.; ceilings.len()];
    let mut leftover = 0.;
    let mut candidates = Vec::new();
    for (i, &ceiling) in ceilings.iter().enumerate() {
        let ceiling = if ceiling.is_nan() { 0. } else { ceiling.max(0.) };
        if ceiling < fair_share {
            allocations[i] = ceiling;
            leftover += fair_share - ceiling;
        } else {
            allocations[i] = fair_share;
            if ceiling > fair_share {
                candidates.push((i, ceiling - fair_share));
            }
        }
    }

    candidates.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
    let mut remaining = candidates.len();
    for (i, unmet) in candidates {
        if leftover <= 0. {
            break;
        }
        let extra = (leftover / remaining as f64).min(unmet);
        allocations[i] += extra;
        leftover -= extra;
        remaining -= 1;
    }
    allocations
}
