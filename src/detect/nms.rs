use crate::frame::BoundingBox;

/// Greedy non-max suppression over parallel `boxes` / `scores` slices.
///
/// Candidates scoring at or below `score_threshold` are discarded. The rest
/// are visited by descending score (ties keep input order) and a box is kept
/// unless its IoU with an already kept box exceeds `nms_threshold`.
///
/// Returns indices into the input slices, in keep order.
pub fn non_max_suppression(
    boxes: &[BoundingBox],
    scores: &[f32],
    score_threshold: f32,
    nms_threshold: f32,
) -> Vec<usize> {
    let mut order: Vec<usize> = (0..boxes.len().min(scores.len()))
        .filter(|&i| scores[i] > score_threshold)
        .collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

    let mut kept: Vec<usize> = Vec::with_capacity(order.len());
    for idx in order {
        let overlaps = kept
            .iter()
            .any(|&k| boxes[k].iou(&boxes[idx]) > nms_threshold);
        if !overlaps {
            kept.push(idx);
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppresses_overlapping_lower_scores() {
        let boxes = [
            BoundingBox::new(0, 0, 100, 100),
            BoundingBox::new(5, 5, 100, 100),
            BoundingBox::new(300, 300, 50, 50),
        ];
        let scores = [0.7, 0.9, 0.6];
        assert_eq!(non_max_suppression(&boxes, &scores, 0.5, 0.5), vec![1, 2]);
    }

    #[test]
    fn drops_scores_at_or_below_threshold() {
        let boxes = [BoundingBox::new(0, 0, 10, 10), BoundingBox::new(50, 0, 10, 10)];
        let scores = [0.5, 0.51];
        assert_eq!(non_max_suppression(&boxes, &scores, 0.5, 0.5), vec![1]);
    }

    #[test]
    fn ties_keep_input_order() {
        let boxes = [
            BoundingBox::new(0, 0, 10, 10),
            BoundingBox::new(100, 0, 10, 10),
            BoundingBox::new(200, 0, 10, 10),
        ];
        let scores = [0.8, 0.8, 0.8];
        assert_eq!(non_max_suppression(&boxes, &scores, 0.5, 0.5), vec![0, 1, 2]);
    }

    #[test]
    fn iou_at_threshold_is_kept() {
        // IoU exactly 1/3 with threshold 1/3 is not "greater than".
        let boxes = [BoundingBox::new(0, 0, 10, 10), BoundingBox::new(5, 0, 10, 10)];
        let scores = [0.9, 0.8];
        let iou = boxes[0].iou(&boxes[1]);
        assert_eq!(non_max_suppression(&boxes, &scores, 0.0, iou), vec![0, 1]);
    }

    #[test]
    fn empty_input() {
        assert!(non_max_suppression(&[], &[], 0.5, 0.5).is_empty());
    }
}
