//! Port-pressure balancing.
//!
//! A model descriptor only says a micro-op may issue on any of several
//! ports; averaging spreads it evenly. A scheduler would instead favor the
//! ports that are less busy across the whole kernel. This pass shifts each
//! micro-op's share between its ports in small steps until the kernel-wide
//! totals of those ports are level.

use portlens_core::AnnotatedInstruction;

/// Amount of pressure moved per step, in cycles.
pub const STEP: f64 = 0.01;

/// Sum of port pressure over the kernel, one value per port.
pub fn port_totals(kernel: &[AnnotatedInstruction], ports: usize) -> Vec<f64> {
    let mut totals = vec![0.0; ports];
    for instr in kernel {
        for (t, p) in totals.iter_mut().zip(&instr.port_pressure) {
            *t += p;
        }
    }
    totals
}

fn extremes(eligible: &[usize], totals: &[f64]) -> (usize, usize) {
    let mut hi = 0;
    let mut lo = 0;
    for (pos, &port) in eligible.iter().enumerate() {
        if totals[port] > totals[eligible[hi]] {
            hi = pos;
        }
        if totals[port] < totals[eligible[lo]] {
            lo = pos;
        }
    }
    (hi, lo)
}

/// Rebalance pressure between alternative ports.
///
/// Instructions are visited last to first. For each micro-op with more than
/// one port, [`STEP`] cycles of that micro-op's own share move from its most
/// loaded port (by kernel-wide total) to its least loaded one until the
/// spread is at most one step, or `cycles * 100` steps have been taken. A
/// port whose remaining share is less than a step is drained into the least
/// loaded port and no longer considered. Each instruction's total pressure
/// is unchanged and no value becomes negative.
pub fn assign_optimal_throughput(
    kernel: Vec<AnnotatedInstruction>,
    ports: &[String],
) -> Vec<AnnotatedInstruction> {
    let mut kernel = kernel;
    let mut totals = port_totals(&kernel, ports.len());

    for idx in (0..kernel.len()).rev() {
        let uops = kernel[idx].port_uops.clone();
        for uop in &uops {
            let mut eligible: Vec<usize> = Vec::new();
            for name in &uop.ports {
                if let Some(port) = ports.iter().position(|p| p == name) {
                    if !eligible.contains(&port) {
                        eligible.push(port);
                    }
                }
            }
            if eligible.len() < 2 || uop.cycles <= 0.0 {
                continue;
            }

            let instr = &mut kernel[idx];
            let share = uop.cycles / eligible.len() as f64;
            let mut alloc: Vec<f64> = eligible
                .iter()
                .map(|&p| share.min(instr.port_pressure[p]))
                .collect();

            let max_steps = (uop.cycles * 100.0).round() as usize;
            for _ in 0..max_steps {
                if eligible.len() < 2 {
                    break;
                }
                let (hi, lo) = extremes(&eligible, &totals);
                let (from, to) = (eligible[hi], eligible[lo]);
                if totals[from] - totals[to] <= STEP {
                    break;
                }
                let amount = alloc[hi].min(STEP);
                instr.port_pressure[from] = (instr.port_pressure[from] - amount).max(0.0);
                instr.port_pressure[to] += amount;
                totals[from] -= amount;
                totals[to] += amount;
                alloc[hi] -= amount;
                alloc[lo] += amount;
                if amount < STEP {
                    eligible.remove(hi);
                    alloc.remove(hi);
                }
            }
        }
    }
    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use portlens_core::{InstructionForm, PortUop, SemanticInstruction};

    fn ports() -> Vec<String> {
        ["0", "1", "2"].iter().map(|s| s.to_string()).collect()
    }

    fn instr(line: usize, pressure: Vec<f64>, uops: Vec<PortUop>) -> AnnotatedInstruction {
        let form = InstructionForm::new(line, "op", vec![]);
        let mut a = AnnotatedInstruction::zero_cost(SemanticInstruction::bare(form), 3);
        a.port_pressure = pressure;
        a.port_uops = uops;
        a
    }

    fn kernel() -> Vec<AnnotatedInstruction> {
        vec![
            instr(1, vec![1.0, 0.0, 0.0], vec![PortUop::new(1.0, ["0"])]),
            instr(2, vec![0.5, 0.5, 0.0], vec![PortUop::new(1.0, ["0", "1"])]),
            instr(3, vec![0.5, 0.5, 0.0], vec![PortUop::new(1.0, ["0", "1"])]),
        ]
    }

    #[test]
    fn totals_are_levelled() {
        let balanced = assign_optimal_throughput(kernel(), &ports());
        let totals = port_totals(&balanced, 3);
        assert!((totals[0] - 1.5).abs() <= STEP + 1e-9, "{totals:?}");
        assert!((totals[1] - 1.5).abs() <= STEP + 1e-9, "{totals:?}");
        assert_eq!(balanced[0].port_pressure, vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn mass_is_conserved_and_non_negative() {
        let before = kernel();
        let after = assign_optimal_throughput(before.clone(), &ports());
        for (b, a) in before.iter().zip(&after) {
            assert!((b.total_pressure() - a.total_pressure()).abs() < 1e-9);
            assert!(a.port_pressure.iter().all(|&p| p >= 0.0));
        }
    }

    #[test]
    fn draining_a_port_keeps_mass() {
        // Port 0 is far busier than one micro-op can compensate.
        let k = vec![
            instr(1, vec![5.0, 0.0, 0.0], vec![PortUop::new(5.0, ["0"])]),
            instr(2, vec![0.5, 0.5, 0.0], vec![PortUop::new(1.0, ["0", "1"])]),
        ];
        let after = assign_optimal_throughput(k, &ports());
        assert!(after[1].port_pressure[0].abs() < 1e-9);
        assert!((after[1].port_pressure[1] - 1.0).abs() < 1e-9);
        assert!(after[1].port_pressure.iter().all(|&p| p >= 0.0));
    }

    #[test]
    fn balanced_kernel_is_a_fixed_point() {
        let once = assign_optimal_throughput(kernel(), &ports());
        let twice = assign_optimal_throughput(once.clone(), &ports());
        for (a, b) in once.iter().zip(&twice) {
            assert_eq!(a.port_pressure, b.port_pressure);
        }
    }

    #[test]
    fn single_port_uops_are_untouched() {
        let k = vec![instr(1, vec![1.0, 0.0, 0.0], vec![PortUop::new(1.0, ["0"])])];
        let after = assign_optimal_throughput(k.clone(), &ports());
        assert_eq!(after[0].port_pressure, k[0].port_pressure);
    }
}
